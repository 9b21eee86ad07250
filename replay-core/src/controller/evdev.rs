//! Linux input-event decoding for the USB jog/shuttle controller.
//!
//! The device node delivers fixed-size `input_event` records (64-bit
//! layout): 16 bytes of timestamp, `u16` type, `u16` code, `i32` value, in
//! native byte order. Buttons arrive as `EV_KEY`, the shuttle ring as
//! `EV_REL`/`REL_WHEEL` with its absolute position, and the jog wheel as
//! `EV_REL`/`REL_DIAL` with a wrapping absolute counter.

use std::io::{ErrorKind, Read};

use log::{debug, trace};

use super::{ControllerEvent, ControllerInput};
use crate::error::InputError;

pub const RECORD_SIZE: usize = 24;

pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;

pub const REL_DIAL: u16 = 0x07;
pub const REL_WHEEL: u16 = 0x08;

/// Jog counter period: the dial reports 1..=255 and wraps
const DIAL_PERIOD: i32 = 255;

/// Decoded fields of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl RawInputEvent {
    pub fn parse(record: &[u8; RECORD_SIZE]) -> RawInputEvent {
        RawInputEvent {
            event_type: u16::from_ne_bytes([record[16], record[17]]),
            code: u16::from_ne_bytes([record[18], record[19]]),
            value: i32::from_ne_bytes([record[20], record[21], record[22], record[23]]),
        }
    }

    /// Encode back into a record with a zero timestamp.
    pub fn to_record(&self) -> [u8; RECORD_SIZE] {
        let mut record = [0u8; RECORD_SIZE];
        record[16..18].copy_from_slice(&self.event_type.to_ne_bytes());
        record[18..20].copy_from_slice(&self.code.to_ne_bytes());
        record[20..24].copy_from_slice(&self.value.to_ne_bytes());
        record
    }
}

/// Turns raw records into controller events, tracking the jog counter.
#[derive(Debug, Default)]
pub struct EvdevDecoder {
    last_dial: Option<i32>,
}

impl EvdevDecoder {
    pub fn new() -> Self {
        EvdevDecoder::default()
    }

    pub fn decode(&mut self, raw: RawInputEvent) -> Option<ControllerEvent> {
        match (raw.event_type, raw.code) {
            (EV_KEY, code) if raw.value == 1 => Some(ControllerEvent::ButtonDown(code)),
            (EV_REL, REL_WHEEL) => Some(ControllerEvent::Shuttle(raw.value)),
            (EV_REL, REL_DIAL) => self.dial(raw.value),
            _ => None,
        }
    }

    fn dial(&mut self, position: i32) -> Option<ControllerEvent> {
        if !(1..=DIAL_PERIOD).contains(&position) {
            debug!("Ignoring jog position {} outside 1..={}", position, DIAL_PERIOD);
            return None;
        }
        let previous = self.last_dial.replace(position)?;
        let mut delta = (position - previous) % DIAL_PERIOD;
        if delta > DIAL_PERIOD / 2 {
            delta -= DIAL_PERIOD;
        } else if delta < -DIAL_PERIOD / 2 {
            delta += DIAL_PERIOD;
        }
        (delta != 0).then_some(ControllerEvent::Jog(delta))
    }
}

/// Controller input reading records from a device node (or any reader).
pub struct EvdevInput<R> {
    reader: R,
    decoder: EvdevDecoder,
}

impl<R: Read + Send> EvdevInput<R> {
    pub fn new(reader: R) -> Self {
        EvdevInput {
            reader,
            decoder: EvdevDecoder::new(),
        }
    }
}

impl<R: Read + Send> ControllerInput for EvdevInput<R> {
    fn next_event(&mut self) -> Result<Option<ControllerEvent>, InputError> {
        let mut record = [0u8; RECORD_SIZE];
        loop {
            match self.reader.read_exact(&mut record) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let raw = RawInputEvent::parse(&record);
            trace!("evdev {:?}", raw);
            if let Some(event) = self.decoder.decode(raw) {
                return Ok(Some(event));
            }
        }
    }
}
