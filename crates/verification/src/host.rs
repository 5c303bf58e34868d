//! Host implementations of the well-known external callables.

use crate::interpreter::{Outcome, Value};
use crate::ExecError;
use base64::{engine::general_purpose::STANDARD, Engine};
use shade_core::WellKnown;
use tracing::debug;

/// Exception raised for malformed base64 input.
pub const FORMAT_EXCEPTION: &str = "System.FormatException";

/// Exception raised for byte sequences that are not UTF-8.
pub const DECODER_EXCEPTION: &str = "System.Text.DecoderFallbackException";

/// Platform stand-in for one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Host {
    /// What the debugger-presence query answers.
    pub debugger_attached: bool,
    /// Lines written to the console.
    pub output: Vec<String>,
}

impl Host {
    pub fn new(debugger_attached: bool) -> Self {
        Self {
            debugger_attached,
            output: Vec::new(),
        }
    }

    /// Calls `known` with `args`, receiver first for instance callables.
    pub fn call(&mut self, known: WellKnown, args: Vec<Value>) -> Result<Outcome, ExecError> {
        let unexpected = || ExecError::TypeMismatch {
            opcode: format!("{known:?}"),
            id: 0,
        };

        let value = match (known, args.as_slice()) {
            (WellKnown::DebuggerIsAttached, []) => Value::I4(i32::from(self.debugger_attached)),
            (WellKnown::EnvironmentExit, [Value::I4(code)]) => {
                debug!("Host exit with code {}", code);
                return Ok(Outcome::Exited(*code));
            }
            (WellKnown::FromBase64String, [Value::Str(text)]) => match STANDARD.decode(text) {
                Ok(bytes) => Value::Bytes(bytes),
                Err(_) => return Ok(Outcome::Threw(Value::Str(FORMAT_EXCEPTION.into()))),
            },
            (WellKnown::ToBase64String, [Value::Bytes(bytes)]) => Value::Str(STANDARD.encode(bytes)),
            (WellKnown::EncodingUtf8, []) => Value::Encoding,
            (WellKnown::EncodingGetString, [Value::Encoding, Value::Bytes(bytes)]) => {
                match String::from_utf8(bytes.clone()) {
                    Ok(text) => Value::Str(text),
                    Err(_) => return Ok(Outcome::Threw(Value::Str(DECODER_EXCEPTION.into()))),
                }
            }
            (WellKnown::EncodingGetBytes, [Value::Encoding, Value::Str(text)]) => {
                Value::Bytes(text.as_bytes().to_vec())
            }
            (WellKnown::ConsoleWriteLine, [value]) => {
                self.output.push(value.to_string());
                return Ok(Outcome::Returned(None));
            }
            _ => return Err(unexpected()),
        };
        Ok(Outcome::Returned(Some(value)))
    }
}
