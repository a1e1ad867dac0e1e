//! ASCII command set of the source-measure unit.
//!
//! Commands follow the Keithley 2400 SCPI dialect. Each command renders to a single line
//! without terminator; the transport appends the line ending.

use crate::error::SmuError;
use std::fmt;

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &str = "\n";

/// Commands understood by the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum SmuCommand {
    /// `*IDN?` - identity query
    Identify,
    /// `*RST` - return to power-on defaults
    Reset,
    /// `:SOUR:FUNC:MODE VOLT` - source voltage
    SourceVoltageMode,
    /// `:SYST:RSEN ON|OFF` - remote sense (4-wire)
    RemoteSense(bool),
    /// `:SOUR:VOLT:PROT <v>` - source overvoltage protection
    SourceVoltageProtection(f64),
    /// `:SENS:VOLT:PROT <v>` - voltage compliance
    VoltageProtection(f64),
    /// `:SENS:CURR:PROT <a>` - current compliance
    CurrentProtection(f64),
    /// `:SENS:AVER:TCON REP` - repeating averaging filter
    AverageRepeat,
    /// `:SENS:AVER:COUN <n>` - readings per average
    AverageCount(u32),
    /// `:SENS:AVER:STAT ON|OFF` - averaging filter enable
    AverageState(bool),
    /// `:SOUR:VOLT <v>` - source setpoint
    SourceVoltage(f64),
    /// `:MEAS:CURR?` - trigger and read one measurement
    MeasureCurrent,
    /// `:OUTP:STATE 0` - disable output
    OutputOff,
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}

impl fmt::Display for SmuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmuCommand::Identify => write!(f, "*IDN?"),
            SmuCommand::Reset => write!(f, "*RST"),
            SmuCommand::SourceVoltageMode => write!(f, ":SOUR:FUNC:MODE VOLT"),
            SmuCommand::RemoteSense(on) => write!(f, ":SYST:RSEN {}", on_off(*on)),
            SmuCommand::SourceVoltageProtection(v) => write!(f, ":SOUR:VOLT:PROT {}", v),
            SmuCommand::VoltageProtection(v) => write!(f, ":SENS:VOLT:PROT {:e}", v),
            SmuCommand::CurrentProtection(a) => write!(f, ":SENS:CURR:PROT {:e}", a),
            SmuCommand::AverageRepeat => write!(f, ":SENS:AVER:TCON REP"),
            SmuCommand::AverageCount(n) => write!(f, ":SENS:AVER:COUN {}", n),
            SmuCommand::AverageState(on) => write!(f, ":SENS:AVER:STAT {}", on_off(*on)),
            SmuCommand::SourceVoltage(v) => write!(f, ":SOUR:VOLT {}", v),
            SmuCommand::MeasureCurrent => write!(f, ":MEAS:CURR?"),
            SmuCommand::OutputOff => write!(f, ":OUTP:STATE 0"),
        }
    }
}

/// Splits a measurement reply into its first two fields.
///
/// The instrument answers `:MEAS:CURR?` with the enabled elements separated by commas
/// (`voltage,current,resistance,time,status`). Only the first two are used; they are kept as
/// the strings the instrument sent.
pub fn parse_pair(command: &SmuCommand, reply: &str) -> Result<(String, String), SmuError> {
    let mut fields = reply.trim().split(',').map(str::trim);
    match (fields.next(), fields.next()) {
        (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => Ok((x.to_string(), y.to_string())),
        _ => Err(SmuError::MalformedReply {
            command: command.to_string(),
            reply: reply.trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        assert_eq!(SmuCommand::Identify.to_string(), "*IDN?");
        assert_eq!(SmuCommand::RemoteSense(true).to_string(), ":SYST:RSEN ON");
        assert_eq!(SmuCommand::RemoteSense(false).to_string(), ":SYST:RSEN OFF");
        assert_eq!(SmuCommand::SourceVoltageProtection(20.0).to_string(), ":SOUR:VOLT:PROT 20");
        assert_eq!(SmuCommand::VoltageProtection(20.0).to_string(), ":SENS:VOLT:PROT 2e1");
        assert_eq!(SmuCommand::CurrentProtection(0.01).to_string(), ":SENS:CURR:PROT 1e-2");
        assert_eq!(SmuCommand::AverageCount(5).to_string(), ":SENS:AVER:COUN 5");
        assert_eq!(SmuCommand::SourceVoltage(0.5).to_string(), ":SOUR:VOLT 0.5");
        assert_eq!(SmuCommand::SourceVoltage(-1.25).to_string(), ":SOUR:VOLT -1.25");
        assert_eq!(SmuCommand::OutputOff.to_string(), ":OUTP:STATE 0");
    }

    #[test]
    fn test_parse_pair_keeps_reply_text() {
        let reply = "+5.000000E-01,+1.234000E-04,+9.910000E+37,+1.0E+00,+1.9E+04\r\n";
        let (x, y) = parse_pair(&SmuCommand::MeasureCurrent, reply).unwrap();
        assert_eq!(x, "+5.000000E-01");
        assert_eq!(y, "+1.234000E-04");
    }

    #[test]
    fn test_parse_pair_rejects_single_field() {
        let err = parse_pair(&SmuCommand::MeasureCurrent, "+5.0E-01").unwrap_err();
        assert!(matches!(err, SmuError::MalformedReply { .. }));
        assert!(parse_pair(&SmuCommand::MeasureCurrent, "").is_err());
        assert!(parse_pair(&SmuCommand::MeasureCurrent, ",").is_err());
    }
}
