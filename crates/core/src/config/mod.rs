//! Configuration file handling.
//!
//! The file is line oriented: the first whitespace-delimited token on a line
//! is the key, the rest of the line is the value, and lines starting with `#`
//! are comments. `Connection` opens a new target block; target keys that
//! appear before any `Connection` belong to an implicit first block.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, ToneFleetError};

pub const DEFAULT_CONFIG_FILE: &str = "tonefleet.conf";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Keyword selecting every track that no target claims explicitly.
const OTHER_TRACKS: &str = "Other";

/// Top-level configuration structure for a performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub known_hosts: PathBuf,
    /// Extra time between the last target connecting and the first note.
    pub initial_delay: Duration,
    pub targets: Vec<TargetConfig>,
}

/// One remote device and the tracks it plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub tracks: TrackSelection,
}

impl TargetConfig {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port: DEFAULT_SSH_PORT,
            username: String::new(),
            password: String::new(),
            tracks: TrackSelection::default(),
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Tracks explicitly assigned to a target, plus whether it also plays every
/// track nobody claimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSelection {
    pub tracks: BTreeSet<u16>,
    pub other_tracks: bool,
}

impl TrackSelection {
    pub fn explicit(tracks: impl IntoIterator<Item = u16>) -> Self {
        Self {
            tracks: tracks.into_iter().collect(),
            other_tracks: false,
        }
    }

    pub fn other() -> Self {
        Self {
            tracks: BTreeSet::new(),
            other_tracks: true,
        }
    }

    pub fn with_other(mut self) -> Self {
        self.other_tracks = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty() && !self.other_tracks
    }
}

impl AppConfig {
    /// Loads and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_str(&text)
    }

    /// Parses configuration text, expanding variables from the process
    /// environment.
    pub fn parse_str(text: &str) -> Result<Self> {
        Self::parse_with_env(text, |name| std::env::var(name).ok())
    }

    /// Parses configuration text with a caller supplied environment.
    pub fn parse_with_env<F>(text: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut known_hosts: Option<PathBuf> = None;
        let mut initial_delay = Duration::ZERO;
        let mut targets = Vec::new();
        let mut block = Block::default();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let Some((key, value)) = split_key_value(line) else {
                continue;
            };
            let syntax = |message: String| ToneFleetError::Config {
                line: line_no,
                message: format!("syntax error in option {key:?}: {message}"),
            };

            match key {
                "KnownHosts" => known_hosts = Some(PathBuf::from(expand_env(value, &env))),
                "InitialDelay" => initial_delay = parse_duration(value).map_err(syntax)?,
                "Connection" => {
                    if block.started {
                        targets.push(block.finish()?);
                    }
                    block = Block::open(line_no);
                    block.target.name = value.to_string();
                }
                "Track" => {
                    block.touch(line_no);
                    parse_tracks(value, &mut block.target.tracks).map_err(syntax)?;
                }
                "Host" => {
                    block.touch(line_no);
                    block.target.host = value.to_string();
                }
                "Port" => {
                    block.touch(line_no);
                    block.target.port = value
                        .parse::<u16>()
                        .map_err(|err| syntax(err.to_string()))?;
                }
                "Username" => {
                    block.touch(line_no);
                    block.target.username = value.to_string();
                }
                "Password" => {
                    block.touch(line_no);
                    block.target.password = value.to_string();
                }
                _ => {}
            }
        }

        if !block.started {
            return Err(ToneFleetError::Config {
                line: text.lines().count(),
                message: "no SSH connections configured".to_string(),
            });
        }
        targets.push(block.finish()?);

        let known_hosts = known_hosts.unwrap_or_else(|| default_known_hosts(&env));
        let config = Self {
            known_hosts,
            initial_delay,
            targets,
        };
        config.warn_on_unassigned_tracks();
        Ok(config)
    }

    fn warn_on_unassigned_tracks(&self) {
        let any_explicit = self.targets.iter().any(|t| !t.tracks.tracks.is_empty());
        let any_other = self.targets.iter().any(|t| t.tracks.other_tracks);
        if !any_explicit && !any_other {
            tracing::warn!("no tracks configured");
        } else if !any_other {
            tracing::warn!("no SSH connection is set to \"Track Other\"");
        }
    }
}

#[derive(Debug)]
struct Block {
    started: bool,
    line: usize,
    target: TargetConfig,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            started: false,
            line: 0,
            target: TargetConfig::new(""),
        }
    }
}

impl Block {
    fn open(line: usize) -> Self {
        Self {
            started: true,
            line,
            ..Self::default()
        }
    }

    fn touch(&mut self, line: usize) {
        if !self.started {
            self.started = true;
            self.line = line;
        }
    }

    fn finish(self) -> Result<TargetConfig> {
        let mut target = self.target;
        if target.host.is_empty() {
            let message = if target.name.is_empty() {
                "Host not defined for connection (unnamed)".to_string()
            } else {
                format!("Host not defined for connection {:?}", target.name)
            };
            return Err(ToneFleetError::Config {
                line: self.line,
                message,
            });
        }
        if target.name.is_empty() {
            target.name = target.host.clone();
        }
        Ok(target)
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((key, value)) => Some((key, value.trim())),
        None => Some((line, "")),
    }
}

fn parse_tracks(value: &str, dest: &mut TrackSelection) -> std::result::Result<(), String> {
    for item in value.split_whitespace() {
        if item == OTHER_TRACKS {
            dest.other_tracks = true;
            continue;
        }
        dest.tracks.insert(parse_track_index(item)?);
    }
    Ok(())
}

fn parse_track_index(item: &str) -> std::result::Result<u16, String> {
    let lower = item.to_ascii_lowercase();
    let (digits, radix) = match lower.get(..2) {
        Some("0x") => (&item[2..], 16),
        Some("0o") => (&item[2..], 8),
        Some("0b") => (&item[2..], 2),
        _ => (item, 10),
    };
    u16::from_str_radix(digits, radix).map_err(|err| format!("invalid track {item:?}: {err}"))
}

/// Parses a duration literal such as `500ms`, `1.5s` or `1m30s`.
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let (negative, mut rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(format!("invalid duration {value:?}"));
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let amount: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {value:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {value:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {value:?}")),
        };
        nanos += amount * scale;
        rest = tail;
    }

    if negative && nanos > 0.0 {
        return Err("duration is negative".to_string());
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

fn expand_env<F>(value: &str, env: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        if chars.peek().map(|(_, c)| *c) == Some('{') {
            chars.next();
            for (_, c) in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some((_, c)) = chars.peek().copied() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
        }
        out.push_str(&env(&name).unwrap_or_default());
    }
    out
}

fn default_known_hosts<F>(env: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let home = env("HOME").or_else(|| env("USERPROFILE")).unwrap_or_default();
    PathBuf::from(home).join(".ssh").join("known_hosts")
}
