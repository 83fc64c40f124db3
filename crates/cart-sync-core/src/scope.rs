//! Which attribute scopes a read consults first and which a write touches.

use std::fmt;
use std::ops::BitOr;

/// Set of attribute scopes modified by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scopes {
    session: bool,
    request: bool,
}

impl Scopes {
    pub const NONE: Scopes = Scopes {
        session: false,
        request: false,
    };
    pub const SESSION: Scopes = Scopes {
        session: true,
        request: false,
    };
    pub const REQUEST: Scopes = Scopes {
        session: false,
        request: true,
    };
    pub const ALL: Scopes = Scopes {
        session: true,
        request: true,
    };

    pub fn session(self) -> bool {
        self.session
    }

    pub fn request(self) -> bool {
        self.request
    }

    pub fn is_empty(self) -> bool {
        !self.session && !self.request
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::ALL
    }
}

impl BitOr for Scopes {
    type Output = Scopes;

    fn bitor(self, rhs: Scopes) -> Scopes {
        Scopes {
            session: self.session || rhs.session,
            request: self.request || rhs.request,
        }
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.session, self.request) {
            (true, true) => "session+request",
            (true, false) => "session",
            (false, true) => "request",
            (false, false) => "none",
        };
        f.write_str(name)
    }
}

/// Where a read looks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Per-request cache first, so every read in one request sees the same value.
    RequestFirst,
    /// Shared session storage first, so a read under the session lock sees the
    /// latest commit of every other request.
    SessionFirst,
}
