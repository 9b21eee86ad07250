//! Line-based text form of controller input.
//!
//! ```text
//! # roll the last event at half speed
//! button 269
//! shuttle -1
//! jog -4
//! button 258
//! ```

use std::io::BufRead;

use super::{ControllerEvent, ControllerInput};
use crate::error::InputError;

/// Parse one script line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ControllerEvent>, InputError> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let (Some(verb), Some(arg), None) = (words.next(), words.next(), words.next()) else {
        return Err(InputError::Malformed(line.to_string()));
    };
    let malformed = |_| InputError::Malformed(line.to_string());

    let event = match verb {
        "button" => ControllerEvent::ButtonDown(arg.parse().map_err(malformed)?),
        "shuttle" => ControllerEvent::Shuttle(arg.parse().map_err(malformed)?),
        "jog" => ControllerEvent::Jog(arg.parse().map_err(malformed)?),
        _ => return Err(InputError::Malformed(line.to_string())),
    };
    Ok(Some(event))
}

/// Controller input reading script lines from any buffered reader.
pub struct ScriptInput<R> {
    reader: R,
    line: String,
}

impl<R: BufRead + Send> ScriptInput<R> {
    pub fn new(reader: R) -> Self {
        ScriptInput {
            reader,
            line: String::new(),
        }
    }
}

impl<R: BufRead + Send> ControllerInput for ScriptInput<R> {
    fn next_event(&mut self) -> Result<Option<ControllerEvent>, InputError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if let Some(event) = parse_line(&self.line)? {
                return Ok(Some(event));
            }
        }
    }
}
