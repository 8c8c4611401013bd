//! Function and runtime kind definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The typed shape of a compiled field function.
///
/// Every accessor bound to a field function returns exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeKind {
    /// 32-bit signed integer (offsets and lengths in bits)
    Int,
    /// 64-bit signed integer (masks, wide values)
    Long,
    /// Boolean (presence checks, flags)
    Boolean,
    /// Text (descriptions, display names, units)
    String,
    /// Any decoded value (addresses, byte ranges, lists)
    Object,
}

impl RuntimeKind {
    /// Human-readable type name for display.
    pub fn type_name(&self) -> &'static str {
        match self {
            RuntimeKind::Int => "int",
            RuntimeKind::Long => "long",
            RuntimeKind::Boolean => "boolean",
            RuntimeKind::String => "string",
            RuntimeKind::Object => "object",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// The functions every field carries once compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Field length in bits
    Length,
    /// Field offset in bits (relative to the header, or to the parent field)
    Offset,
    /// Bit mask of the field within its parent
    Mask,
    /// Decoded value
    Value,
    /// Presence check
    Check,
    /// Free-text description of the current value
    Description,
    /// Display name
    Display,
    /// Units of the value
    Units,
}

impl FunctionKind {
    pub const ALL: [FunctionKind; 8] = [
        FunctionKind::Length,
        FunctionKind::Offset,
        FunctionKind::Mask,
        FunctionKind::Value,
        FunctionKind::Check,
        FunctionKind::Description,
        FunctionKind::Display,
        FunctionKind::Units,
    ];

    /// The runtime kind an accessor must return to be bound to this function.
    ///
    /// `Value` accepts any kind.
    pub fn expected(&self) -> Option<RuntimeKind> {
        match self {
            FunctionKind::Length | FunctionKind::Offset => Some(RuntimeKind::Int),
            FunctionKind::Mask => Some(RuntimeKind::Long),
            FunctionKind::Check => Some(RuntimeKind::Boolean),
            FunctionKind::Description | FunctionKind::Display | FunctionKind::Units => {
                Some(RuntimeKind::String)
            }
            FunctionKind::Value => None,
        }
    }

    /// Suffix used by the accessor naming convention (`<field>_<suffix>`).
    ///
    /// `Value` accessors are named after the field itself.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            FunctionKind::Length => Some("length"),
            FunctionKind::Offset => Some("offset"),
            FunctionKind::Mask => Some("mask"),
            FunctionKind::Value => None,
            FunctionKind::Check => Some("check"),
            FunctionKind::Description => Some("description"),
            FunctionKind::Display => Some("display"),
            FunctionKind::Units => Some("units"),
        }
    }

    /// Conventional accessor name for `field`.
    pub fn accessor_name(&self, field: &str) -> String {
        match self.suffix() {
            Some(suffix) => format!("{field}_{suffix}"),
            None => field.to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Length => "LENGTH",
            FunctionKind::Offset => "OFFSET",
            FunctionKind::Mask => "MASK",
            FunctionKind::Value => "VALUE",
            FunctionKind::Check => "CHECK",
            FunctionKind::Description => "DESCRIPTION",
            FunctionKind::Display => "DISPLAY",
            FunctionKind::Units => "UNITS",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
