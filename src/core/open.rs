//! Purpose: Parse store open parameters: the location/tuning string and the mode string.
//! Exports: `OpenSpec`, `Location`, `Tuning`, `OpenMode`.
//! Role: Pure parsing layer consumed by `store::Store::open`.
//! Invariants: No I/O; unknown tuning names are ignored with a warning, malformed ones rejected.
//! Invariants: Unknown mode characters are usage errors.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};

const PARAM_SEPARATOR: char = '#';
const MEMORY_LOCATIONS: [&str; 3] = ["*", "%", ":memory:"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tuning {
    /// Maximum number of records; inserting a new key past it fails with `Busy`.
    pub capcnt: Option<usize>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenSpec {
    pub location: Location,
    pub tuning: Tuning,
}

impl OpenSpec {
    pub fn memory() -> Self {
        Self {
            location: Location::Memory,
            tuning: Tuning::default(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            tuning: Tuning::default(),
        }
    }

    pub fn with_capcnt(mut self, capcnt: usize) -> Self {
        self.tuning.capcnt = Some(capcnt);
        self
    }

    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut parts = input.split(PARAM_SEPARATOR);
        let location = parts.next().unwrap_or_default();
        if location.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("store location is empty")
                .with_hint("Use a file path, or `*` for an in-memory store."));
        }
        let mut spec = if MEMORY_LOCATIONS.contains(&location) {
            Self::memory()
        } else {
            Self::file(location)
        };

        for param in parts {
            if param.is_empty() {
                continue;
            }
            let (name, value) = param.split_once('=').ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("tuning parameter `{param}` is missing a value"))
                    .with_hint("Tuning parameters look like `path#name=value`.")
            })?;
            match name {
                "capcnt" => {
                    let capcnt = value.parse::<usize>().map_err(|err| {
                        Error::new(ErrorKind::Usage)
                            .with_message(format!("invalid capcnt `{value}`"))
                            .with_source(err)
                    })?;
                    spec.tuning.capcnt = Some(capcnt);
                }
                other => {
                    tracing::warn!(param = other, "ignoring unknown tuning parameter");
                }
            }
        }

        Ok(spec)
    }
}

impl FromStr for OpenSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OpenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Location::Memory => write!(f, "*")?,
            Location::File(path) => write!(f, "{}", path.display())?,
        }
        if let Some(capcnt) = self.tuning.capcnt {
            write!(f, "#capcnt={capcnt}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenMode {
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub auto_sync: bool,
    pub no_lock: bool,
    pub try_lock: bool,
}

impl OpenMode {
    pub fn reader() -> Self {
        Self {
            write: false,
            create: false,
            truncate: false,
            auto_sync: false,
            no_lock: false,
            try_lock: false,
        }
    }

    pub fn writer() -> Self {
        Self {
            write: true,
            create: true,
            ..Self::reader()
        }
    }

    /// Translates a mode string such as `"r"`, `"wc"` or `"wct"`.
    ///
    /// An empty string means `"wc"`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        if input.is_empty() {
            return Ok(Self::writer());
        }
        let mut mode = Self::reader();
        for ch in input.chars() {
            match ch {
                'r' => {}
                'w' => mode.write = true,
                'c' => mode.create = true,
                't' => mode.truncate = true,
                's' => mode.auto_sync = true,
                'l' => mode.no_lock = true,
                'f' => mode.try_lock = true,
                other => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("unknown mode character `{other}`"))
                        .with_hint("Valid mode characters are r, w, c, t, s, l, f."));
                }
            }
        }
        if (mode.create || mode.truncate || mode.auto_sync) && !mode.write {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("mode `{input}` creates or modifies without `w`")));
        }
        Ok(mode)
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        Self::writer()
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
