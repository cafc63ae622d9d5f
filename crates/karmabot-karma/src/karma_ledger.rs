//! Durable karma ledger: an append-only record file plus the score cache
//! derived from it.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;

use crate::karma_parser::{net_delta, KarmaDelta};
use crate::karma_render::{self_target_reply, thank_you_reply, NEGATIVE_KARMA_REPLY};

pub const DEFAULT_KARMA_FILE: &str = "karma.csv";

#[derive(Debug, Error)]
pub enum KarmaLedgerError {
    #[error("failed to access karma log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed karma log {path} line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("karma ledger lock is poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One durable record: a single elementary delta for one user.
pub struct LedgerRecord {
    pub user_id: String,
    pub marker: String,
}

impl LedgerRecord {
    fn encode(&self) -> String {
        format!("{},{}\n", encode_csv_field(&self.user_id), encode_csv_field(&self.marker))
    }

    /// Unknown markers replay as zero.
    pub fn signed_value(&self) -> i64 {
        KarmaDelta::from_marker(&self.marker)
            .map(|delta| delta.value())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of [`KarmaLedger::apply`].
pub enum KarmaApplyOutcome {
    SelfTargetRejected { reply: String },
    Applied { net: i64, reply: Option<String> },
}

impl KarmaApplyOutcome {
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::SelfTargetRejected { reply } => Some(reply),
            Self::Applied { reply, .. } => reply.as_deref(),
        }
    }

    pub fn should_reply(&self) -> bool {
        self.reply().is_some()
    }
}

struct LedgerState {
    scores: HashMap<String, i64>,
    writer: Option<File>,
    log_len: u64,
    /// The existing log ends mid-line; the next append starts a new one.
    needs_separator: bool,
}

/// Owns the score map and the log's write handle. Every mutation takes one
/// lock covering both the append and the map update.
pub struct KarmaLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl KarmaLedger {
    /// Replays the log at `path`. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KarmaLedgerError> {
        let path = path.into();
        let (scores, log_len, needs_separator) = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| KarmaLedgerError::Io {
                path: path.clone(),
                source,
            })?;
            let mut scores = HashMap::new();
            for record in parse_ledger_records(&path, &raw)? {
                *scores.entry(record.user_id.clone()).or_insert(0) += record.signed_value();
            }
            let needs_separator = !raw.is_empty() && !raw.ends_with('\n');
            (scores, raw.len() as u64, needs_separator)
        } else {
            (HashMap::new(), 0, false)
        };

        tracing::debug!(path = %path.display(), users = scores.len(), "karma ledger loaded");
        Ok(Self {
            path,
            state: Mutex::new(LedgerState {
                scores,
                writer: None,
                log_len,
                needs_separator,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `deltas` from `actor_id` to `target_id`. Self-targeting is
    /// rejected without touching the log. Returns once the records are
    /// flushed and the score map updated.
    pub fn apply(
        &self,
        actor_id: &str,
        target_id: &str,
        deltas: &[KarmaDelta],
        bot_user_id: Option<&str>,
    ) -> Result<KarmaApplyOutcome, KarmaLedgerError> {
        if actor_id == target_id {
            return Ok(KarmaApplyOutcome::SelfTargetRejected {
                reply: self_target_reply(actor_id),
            });
        }

        let net = net_delta(deltas);
        if !deltas.is_empty() {
            let payload = deltas
                .iter()
                .map(|delta| {
                    LedgerRecord {
                        user_id: target_id.to_string(),
                        marker: delta.marker().to_string(),
                    }
                    .encode()
                })
                .collect::<String>();

            let mut state = self.state.lock().map_err(|_| KarmaLedgerError::Poisoned)?;
            self.append_locked(&mut state, payload.as_bytes())?;
            *state.scores.entry(target_id.to_string()).or_insert(0) += net;
        }

        let reply = match bot_user_id {
            Some(bot_user_id) if bot_user_id == target_id => match net {
                net if net > 0 => Some(thank_you_reply(actor_id)),
                net if net < 0 => Some(NEGATIVE_KARMA_REPLY.to_string()),
                _ => None,
            },
            _ => None,
        };
        Ok(KarmaApplyOutcome::Applied { net, reply })
    }

    fn append_locked(&self, state: &mut LedgerState, records: &[u8]) -> Result<(), KarmaLedgerError> {
        let io_error = |source| KarmaLedgerError::Io {
            path: self.path.clone(),
            source,
        };
        if state.writer.is_none() {
            state.writer = Some(open_append(&self.path).map_err(io_error)?);
        }
        let Some(writer) = state.writer.as_mut() else {
            return Err(KarmaLedgerError::Poisoned);
        };

        let mut payload = Vec::with_capacity(records.len() + 1);
        if state.needs_separator {
            payload.push(b'\n');
        }
        payload.extend_from_slice(records);

        let written = writer.write_all(&payload).and_then(|_| writer.flush());
        if let Err(source) = written {
            // Drop any partial tail so the log never holds records the map lacks.
            if let Err(truncate_error) = writer.set_len(state.log_len) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate_error,
                    "failed to roll back partial karma log append"
                );
            }
            return Err(io_error(source));
        }
        state.log_len = state.log_len.saturating_add(payload.len() as u64);
        state.needs_separator = false;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<BTreeMap<String, i64>, KarmaLedgerError> {
        let state = self.state.lock().map_err(|_| KarmaLedgerError::Poisoned)?;
        Ok(state
            .scores
            .iter()
            .map(|(user, score)| (user.clone(), *score))
            .collect())
    }

    pub fn score(&self, user_id: &str) -> Result<i64, KarmaLedgerError> {
        let state = self.state.lock().map_err(|_| KarmaLedgerError::Poisoned)?;
        Ok(state.scores.get(user_id).copied().unwrap_or(0))
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Parses every record in `raw`. Quoted fields may span lines; blank lines
/// are skipped and every other record must hold exactly two fields.
pub fn parse_ledger_records(path: &Path, raw: &str) -> Result<Vec<LedgerRecord>, KarmaLedgerError> {
    let malformed = |line: usize, reason: String| KarmaLedgerError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };
    let mut records = Vec::new();
    for record in split_csv_records(raw).map_err(|(line, reason)| malformed(line, reason))? {
        let line = record.line;
        let [user_id, marker]: [String; 2] = record.fields.try_into().map_err(|fields: Vec<String>| {
            malformed(line, format!("expected 2 fields, found {}", fields.len()))
        })?;
        records.push(LedgerRecord { user_id, marker });
    }
    Ok(records)
}

struct CsvRecord {
    /// Line the record starts on, 1-based.
    line: usize,
    fields: Vec<String>,
}

fn split_csv_records(raw: &str) -> Result<Vec<CsvRecord>, (usize, String)> {
    let mut records = Vec::new();
    let mut chars = raw.chars().peekable();
    let mut line = 1_usize;

    while chars.peek().is_some() {
        let start_line = line;
        let mut fields = Vec::new();
        let mut quoted_any = false;
        loop {
            let mut field = String::new();
            let quoted = chars.next_if_eq(&'"').is_some();
            if quoted {
                quoted_any = true;
                loop {
                    match chars.next() {
                        None => return Err((start_line, "unterminated quoted field".to_string())),
                        Some('"') if chars.next_if_eq(&'"').is_some() => field.push('"'),
                        Some('"') => break,
                        Some(ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            field.push(ch);
                        }
                    }
                }
                if !matches!(chars.peek(), None | Some(&',') | Some(&'\n') | Some(&'\r')) {
                    return Err((line, "unexpected character after closing quote".to_string()));
                }
            } else {
                while let Some(ch) = chars.next_if(|ch| *ch != ',' && *ch != '\n') {
                    if ch == '"' {
                        return Err((line, "bare quote in unquoted field".to_string()));
                    }
                    field.push(ch);
                }
            }

            match chars.next() {
                Some(',') => fields.push(field),
                terminator @ (Some('\n') | None) => {
                    if !quoted && field.ends_with('\r') {
                        field.pop();
                    }
                    fields.push(field);
                    if terminator.is_some() {
                        line += 1;
                    }
                    break;
                }
                Some('\r') if chars.next_if_eq(&'\n').is_some() || chars.peek().is_none() => {
                    fields.push(field);
                    line += 1;
                    break;
                }
                Some(_) => {
                    return Err((line, "unexpected character after closing quote".to_string()))
                }
            }
        }

        let blank = !quoted_any && fields.len() == 1 && fields[0].trim().is_empty();
        if !blank {
            records.push(CsvRecord {
                line: start_line,
                fields,
            });
        }
    }
    Ok(records)
}

fn encode_csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) || value.starts_with(' ') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
