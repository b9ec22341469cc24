//! Supported session languages
//!
//! A session has exactly one active [`LanguageTag`]. The recognizer and the
//! assistant backend speak in locale form (`en-US`), while the backend reports
//! the language it detected as a short code (`en`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// A locale the voice session can listen and speak in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LanguageTag {
    /// English (`en-US`)
    #[default]
    English,
    /// Kiswahili (`sw-KE`)
    Swahili,
}

impl LanguageTag {
    /// All supported languages, in menu order
    pub const ALL: [Self; 2] = [Self::English, Self::Swahili];

    /// BCP 47 locale used for recognition, synthesis and backend requests
    #[must_use]
    pub const fn locale(self) -> &'static str {
        match self {
            Self::English => "en-US",
            Self::Swahili => "sw-KE",
        }
    }

    /// Short ISO 639-1 code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Swahili => "sw",
        }
    }

    /// Human-readable label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Swahili => "Kiswahili",
        }
    }

    /// Map the backend's `detected_language` field to a supported language
    ///
    /// Returns `None` for absent or unsupported codes so the caller can fall
    /// back to the active language.
    #[must_use]
    pub fn from_detected(code: Option<&str>) -> Option<Self> {
        match code?.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::English),
            "sw" | "swa" => Some(Self::Swahili),
            _ => None,
        }
    }

    /// Phrase spoken when the backend could not be reached or failed
    #[must_use]
    pub const fn apology(self) -> &'static str {
        match self {
            Self::English => {
                "Sorry, there was an error processing your request. Please try again."
            }
            Self::Swahili => {
                "Samahani, kulikuwa na hitilafu katika kushughulikia ombi lako. Tafadhali jaribu tena."
            }
        }
    }

    /// Phrase spoken when the backend answered without a usable message
    #[must_use]
    pub const fn not_understood(self) -> &'static str {
        match self {
            Self::English => "Sorry, I did not understand that. Could you please rephrase?",
            Self::Swahili => "Samahani, sikuelewa. Tafadhali sema tena kwa maneno mengine?",
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.locale())
    }
}

impl FromStr for LanguageTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "en" | "en-us" | "english" => Ok(Self::English),
            "sw" | "sw-ke" | "swa" | "swahili" | "kiswahili" => Ok(Self::Swahili),
            other => Err(Error::Config(format!("unsupported language: {other}"))),
        }
    }
}

impl Serialize for LanguageTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.locale())
    }
}

impl<'de> Deserialize<'de> for LanguageTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
