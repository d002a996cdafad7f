//! Scheduled commands.
//!
//! ```text
//! schedule at 1 startup lua /startup.lua
//! schedule at 2 */* 03:00 clear arp
//! schedule at 3 2024/12/31 23:59 restart
//! schedule at 4 12:00 syslog debug on
//! no schedule at 4
//! schedule pp 1 mon-fri 8:00 connect
//! schedule pp 1 mon-fri 18:00 disconnect
//! ```
//!
//! `no schedule at ID` printed in a configuration marks that schedule as
//! disabled. PP schedules carry no id of their own; they are identified by
//! interface, days and time.

use std::fmt;

use indexmap::IndexMap;
use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Decoded, Feature, Intent, check_range, parse_number, require};
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "schedule";

const DAYS: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

static SCHEDULE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^schedule at (\S+) (\S+)(?: (.*))?$").expect("static schedule pattern")
});

static PP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^schedule pp (\S+) (\S+) (\S+) (\S+)$").expect("static pp schedule pattern")
});

static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*|\d{1,2}):(\*|\d{2})$").expect("static schedule time pattern")
});

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\*|\d{4}|\d{1,2})(?:/[0-9a-z*,\-]+){1,2}$").expect("static schedule date pattern")
});

/// What a PP schedule does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpAction {
    Connect,
    Disconnect,
}

impl PpAction {
    /// Device keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            PpAction::Connect => "connect",
            PpAction::Disconnect => "disconnect",
        }
    }

    fn parse(token: &str) -> Result<Self, String> {
        match token {
            "connect" => Ok(PpAction::Connect),
            "disconnect" => Ok(PpAction::Disconnect),
            other => Err(format!("invalid pp action '{}'", other)),
        }
    }
}

impl fmt::Display for PpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// After boot.
    Startup,

    /// Every day at `time`.
    Daily { time: String },

    /// On matching dates at `time`. `date` may hold wildcards (`*/*`).
    At { date: String, time: String },

    /// Connect or disconnect a PP interface on `days` (`mon-fri`,
    /// `sat,sun`) at `time`. The schedule's id is the PP number.
    Pp {
        days: String,
        time: String,
        action: PpAction,
    },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => f.write_str("startup"),
            Trigger::Daily { time } => f.write_str(time),
            Trigger::At { date, time } => write!(f, "{} {}", date, time),
            Trigger::Pp { days, time, action } => write!(f, "{} {} {}", days, time, action),
        }
    }
}

/// Identity of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleKey {
    /// `schedule at ID`.
    At(u32),

    /// `schedule pp N DAYS TIME`.
    Pp { pp: u32, days: String, time: String },
}

/// One schedule with its commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule id, or the PP number for [`Trigger::Pp`].
    pub id: u32,
    pub trigger: Trigger,

    /// Commands in printed order; empty for PP schedules.
    #[serde(default)]
    pub commands: Vec<String>,

    /// Cleared by a printed `no schedule at ID`.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl Schedule {
    /// Create a schedule running one command.
    pub fn new(id: u32, trigger: Trigger, command: impl Into<String>) -> Self {
        Self {
            id,
            trigger,
            commands: vec![command.into()],
            enabled: true,
        }
    }

    /// Create a PP connect/disconnect schedule.
    pub fn pp(pp: u32, days: impl Into<String>, time: impl Into<String>, action: PpAction) -> Self {
        Self {
            id: pp,
            trigger: Trigger::Pp {
                days: days.into(),
                time: time.into(),
                action,
            },
            commands: Vec::new(),
            enabled: true,
        }
    }

    /// Set the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn key(&self) -> ScheduleKey {
        match &self.trigger {
            Trigger::Pp { days, time, .. } => ScheduleKey::Pp {
                pp: self.id,
                days: days.clone(),
                time: time.clone(),
            },
            _ => ScheduleKey::At(self.id),
        }
    }
}

impl Reconcilable for Schedule {
    type Key = ScheduleKey;
    type Fallback = (Trigger, Vec<String>);

    fn identity(&self) -> ScheduleKey {
        self.key()
    }

    fn fallback_key(&self) -> Option<Self::Fallback> {
        Some((self.trigger.clone(), self.commands.clone()))
    }
}

/// Schedule feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct Schedules;

impl Schedules {
    /// Decode schedules from any bucket of lines.
    pub fn decode_lines(lines: &[Line]) -> Decoded<Schedule> {
        let mut decoded = Decoded::new();
        let mut schedules: IndexMap<ScheduleKey, (&Line, Schedule)> = IndexMap::new();
        let mut failed: Vec<ScheduleKey> = Vec::new();
        let mut disabled: Vec<(&Line, u32)> = Vec::new();

        for line in lines {
            let text = line.text.as_str();
            if let Some(rest) = text.strip_prefix("no schedule at ") {
                match parse_number(rest.trim(), "schedule id") {
                    Ok(id) => disabled.push((line, id)),
                    Err(reason) => decoded.reject(FEATURE, line, reason),
                }
                continue;
            }
            if text.starts_with("schedule pp ") {
                match parse_pp_line(text) {
                    Ok(schedule) => {
                        let key = schedule.key();
                        if schedules.contains_key(&key) {
                            decoded.reject(FEATURE, line, "duplicate pp schedule");
                            failed.push(key);
                        } else {
                            schedules.insert(key, (line, schedule));
                        }
                    }
                    Err(reason) => decoded.reject(FEATURE, line, reason),
                }
                continue;
            }
            if !text.starts_with("schedule at ") {
                continue;
            }
            let (id, trigger, command) = match parse_line(text) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    decoded.reject(FEATURE, line, reason);
                    if let Some(id) = text.split_whitespace().nth(2).and_then(|t| t.parse().ok()) {
                        failed.push(ScheduleKey::At(id));
                    }
                    continue;
                }
            };
            match schedules.get_mut(&ScheduleKey::At(id)) {
                Some((_, existing)) if existing.trigger != trigger => {
                    decoded.reject(FEATURE, line, format!("schedule {} has two triggers", id));
                    failed.push(ScheduleKey::At(id));
                }
                Some((_, existing)) => existing.commands.push(command),
                None => {
                    schedules.insert(ScheduleKey::At(id), (line, Schedule::new(id, trigger, command)));
                }
            }
        }

        for (line, id) in disabled {
            match schedules.get_mut(&ScheduleKey::At(id)) {
                Some((_, schedule)) => schedule.enabled = false,
                None => trace!("line {}: no schedule {} to disable", line.number, id),
            }
        }

        for (key, (line, schedule)) in schedules {
            if !failed.contains(&key) {
                decoded.push_checked::<Self>(line, schedule);
            }
        }
        decoded
    }
}

fn parse_line(text: &str) -> Result<(u32, Trigger, String), String> {
    let caps = SCHEDULE_LINE
        .captures(text)
        .ok_or("expected schedule at ID TRIGGER COMMAND")?;
    let id = parse_number(&caps[1], "schedule id")?;
    let first = &caps[2];
    let rest = caps.get(3).map_or("", |m| m.as_str());

    let (trigger, command) = if first == "startup" {
        (Trigger::Startup, rest)
    } else if first.contains('/') {
        let (time, command) = rest.split_once(' ').unwrap_or((rest, ""));
        if !TIME.is_match(time) {
            return Err(format!("invalid time '{}'", time));
        }
        (
            Trigger::At {
                date: first.to_string(),
                time: time.to_string(),
            },
            command,
        )
    } else if TIME.is_match(first) {
        (Trigger::Daily { time: first.to_string() }, rest)
    } else {
        return Err(format!("invalid trigger '{}'", first));
    };

    let command = command.trim();
    if command.is_empty() {
        return Err("missing command".into());
    }
    Ok((id, trigger, command.to_string()))
}

fn parse_pp_line(text: &str) -> Result<Schedule, String> {
    let caps = PP_LINE
        .captures(text)
        .ok_or("expected schedule pp N DAYS TIME connect|disconnect")?;
    let pp = parse_number(&caps[1], "pp number")?;
    if !TIME.is_match(&caps[3]) {
        return Err(format!("invalid time '{}'", &caps[3]));
    }
    let action = PpAction::parse(&caps[4])?;
    Ok(Schedule::pp(pp, &caps[2], &caps[3], action))
}

fn check_time(time: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidValue {
        feature: FEATURE,
        field: "time",
        value: time.to_string(),
    };
    let caps = TIME.captures(time).ok_or_else(invalid)?;
    let in_range = |part: &str, max: u32| part == "*" || part.parse::<u32>().is_ok_and(|n| n <= max);
    if in_range(&caps[1], 23) && in_range(&caps[2], 59) {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// `mon`, `mon-fri` or `sat,sun`.
fn check_days(days: &str) -> Result<(), ValidationError> {
    let valid = match days.split_once('-') {
        Some((first, last)) => DAYS.contains(&first) && DAYS.contains(&last),
        None => days.split(',').all(|day| DAYS.contains(&day)),
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            feature: FEATURE,
            field: "days",
            value: days.to_string(),
        })
    }
}

impl Feature for Schedules {
    type Record = Schedule;

    const NAME: &'static str = FEATURE;

    fn show_command() -> &'static str {
        "show config | grep schedule"
    }

    fn decode(stanza: &Stanza) -> Decoded<Schedule> {
        Self::decode_lines(stanza.top_level())
    }

    fn validate(schedule: &Schedule) -> Result<(), ValidationError> {
        check_range(FEATURE, "id", schedule.id.into(), 1, 65535)?;
        match &schedule.trigger {
            Trigger::Startup => {}
            Trigger::Daily { time } => check_time(time)?,
            Trigger::At { date, time } => {
                if !DATE.is_match(date) {
                    return Err(ValidationError::InvalidValue {
                        feature: FEATURE,
                        field: "date",
                        value: date.clone(),
                    });
                }
                check_time(time)?;
            }
            Trigger::Pp { days, time, .. } => {
                check_days(days)?;
                check_time(time)?;
                if !schedule.commands.is_empty() {
                    return Err(ValidationError::InvalidValue {
                        feature: FEATURE,
                        field: "commands",
                        value: schedule.commands.join("; "),
                    });
                }
                if !schedule.enabled {
                    return Err(ValidationError::Requires {
                        feature: FEATURE,
                        field: "enabled",
                        requirement: "a schedule at ID".into(),
                    });
                }
                return Ok(());
            }
        }
        if schedule.commands.is_empty() {
            return Err(ValidationError::Missing {
                feature: FEATURE,
                field: "commands",
            });
        }
        for command in &schedule.commands {
            require(FEATURE, "commands", command)?;
            if command.contains('\n') {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "commands",
                    value: command.clone(),
                });
            }
        }
        Ok(())
    }

    /// A disabled schedule is written the way the device prints it: its
    /// lines followed by `no schedule at ID`.
    fn encode(schedule: &Schedule, intent: Intent) -> Result<Vec<String>, ValidationError> {
        match (intent, &schedule.trigger) {
            (Intent::Set, Trigger::Pp { .. }) => {
                Self::validate(schedule)?;
                Ok(vec![format!("schedule pp {} {}", schedule.id, schedule.trigger)])
            }
            (Intent::Set, trigger) => {
                Self::validate(schedule)?;
                let mut commands: Vec<String> = schedule
                    .commands
                    .iter()
                    .map(|command| format!("schedule at {} {} {}", schedule.id, trigger, command))
                    .collect();
                if !schedule.enabled {
                    commands.push(format!("no schedule at {}", schedule.id));
                }
                Ok(commands)
            }
            (Intent::Delete, Trigger::Pp { days, time, .. }) => {
                Ok(vec![format!("no schedule pp {} {} {}", schedule.id, days, time)])
            }
            (Intent::Delete, _) => Ok(vec![format!("no schedule at {}", schedule.id)]),
        }
    }
}
