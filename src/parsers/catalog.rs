//! Header and channel-definition block parsing.
//!
//! A log starts with `Key : Value` metadata lines, followed by one
//! `Channel` / `ID` / `Type` / `DisplayMaxMin` group per channel. The first
//! line that looks like a timestamped row starts the data block.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;
use strum::{AsRefStr, EnumString};

use super::types::{ChannelId, ChannelInfo, ChannelType};
use crate::error::ParseError;

/// Optional marker line at the top of a log
const DATALOG_MARKER: &str = "%DataLog%";

/// Header key that declares the timestamp format of the data block
const TIME_FORMAT_KEY: &str = "TimeFormat";

static KV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<name>[^:]+?)\s*:\s*(?<value>.*)$").expect("Failed to compile regex")
});

static CLOCK_ROW_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}:\d{2}").expect("Failed to compile regex"));

/// How timestamps in the data block are written
#[derive(AsRefStr, Clone, Copy, Debug, Default, EnumString, PartialEq, Eq, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum TimeFormat {
    /// Wall clock `HH:MM:SS.fff`, stored as seconds since midnight
    #[default]
    Clock,
    /// Elapsed seconds
    Seconds,
}

impl TimeFormat {
    /// Parse one timestamp field to seconds
    pub fn parse(&self, field: &str) -> Option<f64> {
        let seconds = match self {
            TimeFormat::Clock => parse_clock(field)?,
            TimeFormat::Seconds => field.parse::<f64>().ok()?,
        };
        seconds.is_finite().then_some(seconds)
    }

    /// Check if a line looks like a data row (starts with a timestamp)
    fn is_data_row(&self, line: &str) -> bool {
        match self {
            TimeFormat::Clock => CLOCK_ROW_REGEX.is_match(line),
            TimeFormat::Seconds => {
                line.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
                    && !line.contains(':')
            }
        }
    }
}

/// Parse timestamp from HH:MM:SS.mmm format to seconds
fn parse_clock(timestamp: &str) -> Option<f64> {
    let mut parts = timestamp.split(':');
    let hours: f64 = parts.next()?.trim().parse().ok()?;
    let minutes: f64 = parts.next()?.trim().parse().ok()?;
    // Seconds may include milliseconds
    let seconds: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Channel under construction while its declaration lines are read
struct PendingChannel {
    name: String,
    line: usize,
    id: Option<ChannelId>,
    channel_type: Option<ChannelType>,
    display: Option<(f64, f64)>,
}

impl PendingChannel {
    fn new(name: String, line: usize) -> Self {
        Self {
            name,
            line,
            id: None,
            channel_type: None,
            display: None,
        }
    }

    fn finish(self) -> Result<ChannelInfo, ParseError> {
        let id = self.id.ok_or_else(|| {
            ParseError::header(self.line, format!("channel {:?} has no ID", self.name))
        })?;
        let channel_type = self.channel_type.ok_or_else(|| {
            ParseError::header(self.line, format!("channel {:?} has no declared Type", self.name))
        })?;
        let (display_max, display_min) = match self.display {
            Some((max, min)) => (Some(max), Some(min)),
            None => (None, None),
        };

        Ok(ChannelInfo {
            name: self.name,
            id,
            channel_type,
            display_min,
            display_max,
        })
    }
}

/// Metadata and channel definitions of one log.
#[derive(Clone, Debug)]
pub struct ChannelCatalog {
    metadata: BTreeMap<String, String>,
    channels: Vec<ChannelInfo>,
    time_format: TimeFormat,
    data_start: usize,
    data_first_line: usize,
}

impl ChannelCatalog {
    /// Parse the header and channel-definition blocks of `contents`.
    ///
    /// Both blocks are mandatory. The data block may be empty.
    pub fn parse(contents: &str) -> Result<Self, ParseError> {
        let mut metadata = BTreeMap::new();
        let mut channels: Vec<ChannelInfo> = Vec::new();
        let mut current: Option<PendingChannel> = None;
        let mut time_format = TimeFormat::default();
        let mut header_seen = false;

        let mut offset = 0;
        let mut line_no = 0;
        let mut data_start = None;

        for raw_line in contents.split_inclusive('\n') {
            line_no += 1;
            let line_start = offset;
            offset += raw_line.len();

            let line = raw_line.trim();
            if line.is_empty() || line == DATALOG_MARKER {
                continue;
            }

            if time_format.is_data_row(line) {
                data_start = Some(line_start);
                break;
            }

            let Some(captures) = KV_REGEX.captures(line) else {
                return Err(ParseError::header(
                    line_no,
                    format!("expected `Key : Value`, found {:?}", line),
                ));
            };
            let name = captures["name"].trim();
            let value = captures["value"].trim();

            match name {
                // "Channel" key indicates start of a new channel definition
                "Channel" => {
                    if !header_seen {
                        return Err(ParseError::header(
                            line_no,
                            "channel definitions must follow the metadata header",
                        ));
                    }
                    if value.is_empty() {
                        return Err(ParseError::header(line_no, "channel with an empty name"));
                    }
                    if let Some(pending) = current.take() {
                        channels.push(pending.finish()?);
                    }
                    if channels.iter().any(|c| c.name == value) {
                        return Err(ParseError::header(
                            line_no,
                            format!("duplicate channel name {:?}", value),
                        ));
                    }
                    current = Some(PendingChannel::new(value.to_string(), line_no));
                }
                "ID" | "Type" | "DisplayMaxMin" => {
                    let Some(pending) = current.as_mut() else {
                        return Err(ParseError::header(
                            line_no,
                            format!("{} outside of a channel definition", name),
                        ));
                    };
                    apply_channel_key(pending, name, value, line_no)?;
                }
                TIME_FORMAT_KEY => {
                    time_format = TimeFormat::from_str(value).map_err(|_| {
                        ParseError::header(line_no, format!("unknown time format {:?}", value))
                    })?;
                    metadata.insert(name.to_string(), value.to_string());
                    header_seen = true;
                }
                _ => {
                    metadata.insert(name.to_string(), value.to_string());
                    header_seen = true;
                }
            }
        }

        if let Some(pending) = current.take() {
            channels.push(pending.finish()?);
        }

        if !header_seen {
            return Err(ParseError::header(line_no.max(1), "missing metadata header block"));
        }
        if channels.is_empty() {
            return Err(ParseError::header(
                line_no.max(1),
                "missing channel-definition block",
            ));
        }

        let data_start = data_start.unwrap_or(contents.len());
        // Data rows are numbered from the line after the last header line
        let data_first_line = if data_start < contents.len() {
            line_no
        } else {
            line_no + 1
        };

        Ok(Self {
            metadata,
            channels,
            time_format,
            data_start,
            data_first_line,
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn time_format(&self) -> TimeFormat {
        self.time_format
    }

    /// The data block of the `contents` this catalog was parsed from
    pub fn data_block<'a>(&self, contents: &'a str) -> &'a str {
        contents.get(self.data_start..).unwrap_or_default()
    }

    /// 1-based line number of the first line of the data block
    pub fn data_first_line(&self) -> usize {
        self.data_first_line
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, String>, Vec<ChannelInfo>) {
        (self.metadata, self.channels)
    }
}

fn apply_channel_key(
    pending: &mut PendingChannel,
    key: &str,
    value: &str,
    line: usize,
) -> Result<(), ParseError> {
    match key {
        "ID" => {
            if pending.id.is_some() {
                return Err(duplicate_key(line, key, &pending.name));
            }
            if value.is_empty() {
                return Err(ParseError::header(line, "empty channel ID"));
            }
            pending.id = Some(ChannelId::parse(value));
        }
        "Type" => {
            if pending.channel_type.is_some() {
                return Err(duplicate_key(line, key, &pending.name));
            }
            if value.is_empty() {
                return Err(ParseError::header(line, "empty channel Type"));
            }
            let channel_type = ChannelType::from_str(value)
                .unwrap_or_else(|_| ChannelType::Other(value.to_string()));
            if let ChannelType::Other(name) = &channel_type {
                tracing::debug!("Channel {:?} declares unlisted type {}", pending.name, name);
            }
            pending.channel_type = Some(channel_type);
        }
        // DisplayMaxMin
        _ => {
            if pending.display.is_some() {
                return Err(duplicate_key(line, key, &pending.name));
            }
            // Format: "max,min"
            let bounds: Vec<&str> = value.split(',').map(str::trim).collect();
            let parsed = match bounds.as_slice() {
                [max, min] => max.parse::<f64>().ok().zip(min.parse::<f64>().ok()),
                _ => None,
            };
            let Some(display) = parsed else {
                return Err(ParseError::header(
                    line,
                    format!("DisplayMaxMin must be `max,min`, found {:?}", value),
                ));
            };
            pending.display = Some(display);
        }
    }
    Ok(())
}

fn duplicate_key(line: usize, key: &str, channel: &str) -> ParseError {
    ParseError::header(line, format!("{} declared twice for channel {:?}", key, channel))
}
