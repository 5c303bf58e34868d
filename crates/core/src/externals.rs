//! Well-known external callables the transforms reference.

use crate::module::{ExternalMethod, MethodSig, TypeSig};
use serde::{Deserialize, Serialize};

/// Callables resolved from the platform library rather than the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WellKnown {
    /// `bool System.Diagnostics.Debugger::get_IsAttached()`
    DebuggerIsAttached,
    /// `void System.Environment::Exit(int32)`
    EnvironmentExit,
    /// `uint8[] System.Convert::FromBase64String(string)`
    FromBase64String,
    /// `string System.Convert::ToBase64String(uint8[])`
    ToBase64String,
    /// `System.Text.Encoding System.Text.Encoding::get_UTF8()`
    EncodingUtf8,
    /// `string System.Text.Encoding::GetString(uint8[])`
    EncodingGetString,
    /// `uint8[] System.Text.Encoding::GetBytes(string)`
    EncodingGetBytes,
    /// `void System.Console::WriteLine(string)`
    ConsoleWriteLine,
}

impl WellKnown {
    /// Every well-known callable.
    pub const ALL: [Self; 8] = [
        Self::DebuggerIsAttached,
        Self::EnvironmentExit,
        Self::FromBase64String,
        Self::ToBase64String,
        Self::EncodingUtf8,
        Self::EncodingGetString,
        Self::EncodingGetBytes,
        Self::ConsoleWriteLine,
    ];

    /// Import-table entry for this callable.
    pub fn descriptor(self) -> ExternalMethod {
        let bytes = || TypeSig::Array(Box::new(TypeSig::Class("System.Byte".into())));
        let encoding = || TypeSig::Class("System.Text.Encoding".into());
        let (declaring_type, name, sig) = match self {
            Self::DebuggerIsAttached => (
                "System.Diagnostics.Debugger",
                "get_IsAttached",
                MethodSig::static_fn(vec![], TypeSig::Bool),
            ),
            Self::EnvironmentExit => (
                "System.Environment",
                "Exit",
                MethodSig::static_fn(vec![TypeSig::I4], TypeSig::Void),
            ),
            Self::FromBase64String => (
                "System.Convert",
                "FromBase64String",
                MethodSig::static_fn(vec![TypeSig::String], bytes()),
            ),
            Self::ToBase64String => (
                "System.Convert",
                "ToBase64String",
                MethodSig::static_fn(vec![bytes()], TypeSig::String),
            ),
            Self::EncodingUtf8 => (
                "System.Text.Encoding",
                "get_UTF8",
                MethodSig::static_fn(vec![], encoding()),
            ),
            Self::EncodingGetString => (
                "System.Text.Encoding",
                "GetString",
                MethodSig::instance_fn(vec![bytes()], TypeSig::String),
            ),
            Self::EncodingGetBytes => (
                "System.Text.Encoding",
                "GetBytes",
                MethodSig::instance_fn(vec![TypeSig::String], bytes()),
            ),
            Self::ConsoleWriteLine => (
                "System.Console",
                "WriteLine",
                MethodSig::static_fn(vec![TypeSig::String], TypeSig::Void),
            ),
        };
        ExternalMethod {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            sig,
        }
    }

    /// Recognises an import entry as a well-known callable.
    pub fn identify(external: &ExternalMethod) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|known| known.descriptor() == *external)
    }
}
