//! Cipher preference resolution
//!
//! Maps the user-selected cipher preference onto an ordering constraint for
//! the transport's cipher negotiation. A constraint never removes ciphers, it
//! only moves the preferred family to the front of the list.

use std::fmt;

/// Cipher family preferred during key exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherPreference {
    /// Let the transport negotiate with its default order
    #[default]
    Auto,
    /// Prefer AES-256 based ciphers
    Aes256,
    /// Prefer AES-192 based ciphers
    Aes192,
    /// Prefer AES-128 based ciphers
    Aes128,
}

impl CipherPreference {
    /// Parse a preference name; unknown names fall back to `Auto`
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "aes256" => Self::Aes256,
            "aes192" => Self::Aes192,
            "aes128" => Self::Aes128,
            _ => Self::Auto,
        }
    }

    /// Map the numeric dropdown ids (0 = auto .. 3 = aes128); unknown ids fall back to `Auto`
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Self::Aes256,
            2 => Self::Aes192,
            3 => Self::Aes128,
            _ => Self::Auto,
        }
    }
}

impl fmt::Display for CipherPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Aes256 => "aes256",
            Self::Aes192 => "aes192",
            Self::Aes128 => "aes128",
        };
        f.write_str(name)
    }
}

/// Ordering constraint: ciphers whose name contains `prepend` go first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherConstraint {
    prepend: &'static str,
}

impl CipherConstraint {
    /// Name fragment identifying the preferred family
    pub fn pattern(&self) -> &'static str {
        self.prepend
    }

    /// Whether a cipher name belongs to the preferred family
    pub fn matches(&self, cipher: &str) -> bool {
        cipher.contains(self.prepend)
    }

    /// Reorder `available` so matching ciphers come first.
    ///
    /// Relative order inside both groups is preserved and no cipher is dropped.
    pub fn order<N>(&self, available: &[N]) -> Vec<N>
    where
        N: AsRef<str> + Clone,
    {
        let (mut preferred, rest): (Vec<N>, Vec<N>) = available
            .iter()
            .cloned()
            .partition(|name| self.matches(name.as_ref()));
        preferred.extend(rest);
        preferred
    }
}

/// Resolve a preference into an optional ordering constraint
pub fn resolve(preference: CipherPreference) -> Option<CipherConstraint> {
    let prepend = match preference {
        CipherPreference::Auto => return None,
        CipherPreference::Aes256 => "aes256",
        CipherPreference::Aes192 => "aes192",
        CipherPreference::Aes128 => "aes128",
    };
    Some(CipherConstraint { prepend })
}
