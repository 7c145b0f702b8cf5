//! Hierarchical names and the pull-name convention layered on top of them.
//!
//! Every request and response is addressed by a [`Name`], a `/`-separated
//! list of components. The session core only understands names of the form
//!
//! ```text
//! <topology-prefix>/<peer-id>/<stream-id>/<project>/<seq>
//! <topology-prefix>/<peer-id>/<stream-id>/<project>/heartbeat
//! ```
//!
//! which [`Namespace`] builds and parses into a typed [`PullName`]. The
//! peer id is always the owner (producer) of the stream.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Reserved final component identifying liveness probes.
pub const HEARTBEAT_COMPONENT: &str = "heartbeat";

/// A `/`-separated hierarchical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    /// Build a name from already-split components.
    #[must_use]
    pub fn from_components(components: Vec<String>) -> Self {
        Self { components }
    }

    /// Return a copy of this name with one more component.
    #[must_use]
    pub fn child(&self, component: impl Into<String>) -> Self {
        let mut components = self.components.clone();
        components.push(component.into());
        Self { components }
    }

    /// Components in order.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the name is the root name `/`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Whether `prefix` is a component-wise prefix of this name.
    #[must_use]
    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.components.starts_with(&prefix.components)
    }
}

impl FromStr for Name {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(AppError::Name(format!("name must start with '/': {raw}")));
        }
        let components = raw
            .split('/')
            .filter(|component| !component.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self { components })
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

/// What a pull name asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// A data item at this sequence number.
    Sequence(u64),
    /// A liveness probe / handshake.
    Heartbeat,
}

/// A name parsed according to the pull-name convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullName {
    /// Owner of the stream; also the session key on both sides.
    pub peer: String,
    /// Data sequence number or heartbeat marker.
    pub kind: NameKind,
    name: Name,
}

impl PullName {
    /// Sequence number when this is a data name.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self.kind {
            NameKind::Sequence(seq) => Some(seq),
            NameKind::Heartbeat => None,
        }
    }

    /// Whether this is a liveness probe.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.kind == NameKind::Heartbeat
    }

    /// The fully qualified name.
    #[must_use]
    pub fn name(&self) -> &Name {
        &self.name
    }
}

impl Display for PullName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

/// The `<topology-prefix>`, `<stream-id>` and `<project>` every name of one
/// deployment shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: Name,
    stream: String,
    project: String,
}

impl Namespace {
    /// Construct a namespace from its parts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Name` if the prefix does not parse or the stream or
    /// project is not a single non-empty component.
    pub fn new(prefix: &str, stream: &str, project: &str) -> Result<Self> {
        let prefix: Name = prefix.parse()?;
        for (field, value) in [("stream", stream), ("project", project)] {
            if value.is_empty() || value.contains('/') {
                return Err(AppError::Name(format!(
                    "{field} must be a single component: {value:?}"
                )));
            }
        }
        Ok(Self {
            prefix,
            stream: stream.to_owned(),
            project: project.to_owned(),
        })
    }

    /// Namespace described by the global configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Name` if the configured components are invalid.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Self::new(&config.topology_prefix, &config.stream_id, &config.project)
    }

    /// The shared topology prefix.
    #[must_use]
    pub fn topology_prefix(&self) -> &Name {
        &self.prefix
    }

    /// `<prefix>/<peer>/<stream>/<project>`: everything a producer answers.
    #[must_use]
    pub fn stream_prefix(&self, peer: &str) -> Name {
        self.prefix
            .child(peer)
            .child(self.stream.as_str())
            .child(self.project.as_str())
    }

    /// Name of the data item `seq` in `peer`'s stream.
    #[must_use]
    pub fn data_name(&self, peer: &str, seq: u64) -> PullName {
        PullName {
            peer: peer.to_owned(),
            kind: NameKind::Sequence(seq),
            name: self.stream_prefix(peer).child(seq.to_string()),
        }
    }

    /// Name of the heartbeat probe for `peer`'s stream.
    #[must_use]
    pub fn heartbeat_name(&self, peer: &str) -> PullName {
        PullName {
            peer: peer.to_owned(),
            kind: NameKind::Heartbeat,
            name: self.stream_prefix(peer).child(HEARTBEAT_COMPONENT),
        }
    }

    /// Interpret `name` under this namespace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Name` if the name is outside the topology prefix,
    /// has the wrong number of components, belongs to another stream or
    /// project, or ends in something other than a sequence number or
    /// `heartbeat`.
    pub fn parse(&self, name: &Name) -> Result<PullName> {
        if !name.starts_with(&self.prefix) {
            return Err(AppError::Name(format!(
                "{name} is outside topology prefix {}",
                self.prefix
            )));
        }

        let rest = &name.components()[self.prefix.len()..];
        let [peer, stream, project, last] = rest else {
            return Err(AppError::Name(format!(
                "{name} does not have the form <peer>/<stream>/<project>/<seq|heartbeat>"
            )));
        };

        if *stream != self.stream || *project != self.project {
            return Err(AppError::Name(format!(
                "{name} belongs to another stream or project"
            )));
        }

        let kind = if last == HEARTBEAT_COMPONENT {
            NameKind::Heartbeat
        } else {
            let seq = last
                .parse::<u64>()
                .map_err(|err| AppError::Name(format!("bad sequence number in {name}: {err}")))?;
            NameKind::Sequence(seq)
        };

        Ok(PullName {
            peer: peer.clone(),
            kind,
            name: name.clone(),
        })
    }
}
