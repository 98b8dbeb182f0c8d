//! Version handshake
//!
//! The `PROTOCOL` and `KOSMOS` modules each report the Git identity of the
//! code they were built from. The host reads it with a fixed batch of seven
//! requests and parses the describe string into a [`GitDescribe`].
//!
//! A malformed identity is fatal: host and FPGA are expected to be built
//! from well-formed Git checkouts.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{Frame, GitInfo, GitVersion, msg_cmd, msg_id, trim_nul};
use crate::sequencer::Sequencer;
use crate::{KosmosError, Result};

const MIN_HASH_LEN: usize = 7;

/// Module whose identity is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionTarget {
    /// Kosmos gateware
    Kosmos,
    /// Message protocol definition
    Protocol,
}

impl VersionTarget {
    pub fn msg_id(self) -> u8 {
        match self {
            VersionTarget::Kosmos => msg_id::KOSMOS,
            VersionTarget::Protocol => msg_id::PROTOCOL,
        }
    }
}

/// Semantic version parsed from a `v<M>.<m>.<p>[-<modifier>]` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub modifier: Option<String>,
}

impl SemVer {
    /// Parse a tag of the form `v<M>[.-]<m>[.-]<p>[-<modifier>]`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let rest = tag.strip_prefix('v')?;
        let (major, rest) = split_number(rest)?;
        let rest = rest.strip_prefix(['.', '-'])?;
        let (minor, rest) = split_number(rest)?;
        let rest = rest.strip_prefix(['.', '-'])?;
        let (patch, rest) = split_number(rest)?;

        let modifier = if rest.is_empty() {
            None
        } else {
            let modifier = rest.strip_prefix('-')?;
            if modifier.is_empty() {
                return None;
            }
            Some(modifier.to_string())
        };

        Some(Self { major, minor, patch, modifier })
    }
}

impl std::fmt::Display for SemVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(modifier) = &self.modifier {
            write!(f, "-{}", modifier)?;
        }
        Ok(())
    }
}

fn split_number(text: &str) -> Option<(u32, &str)> {
    let end = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

fn is_hash(text: &str) -> bool {
    text.len() >= MIN_HASH_LEN && text.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parsed `git describe --tags --long --dirty` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitDescribe {
    pub tag: Option<String>,
    pub version: Option<SemVer>,
    pub count: Option<u32>,
    pub hash: Option<String>,
    pub dirty: bool,
}

impl GitDescribe {
    /// Parse `<tag>[-<count>-g<hash>][-dirty]` or a bare `<hash>[-dirty]`.
    pub fn parse(text: &str) -> Result<Self> {
        let error = |reason: &str| KosmosError::version_format(text, reason);

        let (rest, dirty) = match text.strip_suffix("-dirty") {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        if rest.is_empty() {
            return Err(error("empty describe string"));
        }
        if rest.split('-').any(|token| token == "dirty") {
            return Err(error("dirty flag must be a single trailing token"));
        }

        let tokens: Vec<&str> = rest.rsplitn(3, '-').collect();
        if let [hash_token, count_token, tag] = tokens[..]
            && let Some(hash) = hash_token.strip_prefix('g')
            && !count_token.is_empty()
            && count_token.chars().all(|c| c.is_ascii_digit())
        {
            if !is_hash(hash) {
                return Err(error("hash must be hexadecimal with at least 7 digits"));
            }
            let count: u32 = count_token.parse().map_err(|_| error("commit count out of range"))?;
            if count == 0 {
                return Err(error("a hash requires a commit count greater than zero"));
            }
            if tag.is_empty() {
                return Err(error("empty tag"));
            }
            return Ok(Self {
                tag: Some(tag.to_string()),
                version: SemVer::from_tag(tag),
                count: Some(count),
                hash: Some(hash.to_string()),
                dirty,
            });
        }

        if is_hash(rest) {
            return Ok(Self { tag: None, version: None, count: None, hash: Some(rest.to_string()), dirty });
        }

        Ok(Self { tag: Some(rest.to_string()), version: SemVer::from_tag(rest), count: None, hash: None, dirty })
    }
}

/// Git identity of a Kosmos module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Short hash from the `VERSION` reply
    pub hash: String,
    /// Build timestamp, seconds since the Unix epoch
    pub timestamp: u32,
    pub dirty: bool,
    pub debug: bool,
    /// Raw describe string
    pub describe_str: String,
    pub describe: GitDescribe,
    pub branch: String,
    pub full_hash: String,
}

/// Read the Git identity of `target` with one seven-request batch.
pub fn read_version_info(sequencer: &Sequencer, target: VersionTarget) -> Result<VersionInfo> {
    let id = target.msg_id();
    let commands = [
        msg_cmd::VERSION,
        msg_cmd::GIT_DESCRIBE_1,
        msg_cmd::GIT_DESCRIBE_2,
        msg_cmd::GIT_BRANCH_1,
        msg_cmd::GIT_BRANCH_2,
        msg_cmd::GIT_HASH_1,
        msg_cmd::GIT_HASH_2,
    ];

    let pairs = sequencer.with_lock(|seq| {
        if seq.offline_mode() {
            return Err(KosmosError::invalid_state("version info cannot be read in offline mode"));
        }
        seq.send_control(commands.iter().map(|&cmd| Frame::new(id, cmd)).collect())
    })?;

    let replies: Vec<&Frame> = pairs.iter().map(|(_, rx)| rx).collect();
    let version = replies[0].extract::<GitVersion>()?;
    let joined = |first: &Frame, second: &Frame| -> Result<String> {
        let mut bytes = first.extract::<GitInfo>()?.value.to_vec();
        bytes.extend_from_slice(&second.extract::<GitInfo>()?.value);
        Ok(trim_nul(&bytes))
    };

    let describe_str = joined(replies[1], replies[2])?;
    let branch = joined(replies[3], replies[4])?;
    let full_hash = joined(replies[5], replies[6])?;

    if !is_hash(&full_hash) {
        return Err(KosmosError::version_format(full_hash, "hash must be hexadecimal with at least 7 digits"));
    }
    let describe = GitDescribe::parse(&describe_str)?;
    debug!("{:?} version: {} on {} ({})", target, describe_str, branch, full_hash);

    Ok(VersionInfo {
        hash: version.hash_str(),
        timestamp: version.timestamp,
        dirty: version.is_dirty,
        debug: version.is_debug,
        describe_str,
        describe,
        branch,
        full_hash,
    })
}
