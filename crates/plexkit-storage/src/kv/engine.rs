// ── Append-only log engine ──
//
// The on-disk format is a sequence of RESP arrays of bulk strings:
//
//   *3\r\n$3\r\nset\r\n$5\r\nb:key\r\n$4\r\n"v1"\r\n
//
// Supported commands: `set <key> <value> [pxat <unix-ms>]`, `del <key>`
// and `flushdb`. The whole keyspace is replayed into memory on open;
// writes append to the file and update the in-memory map.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::with_suffix;
use crate::error::Error;

const CMD_SET: &str = "set";
const CMD_DEL: &str = "del";
const CMD_FLUSHDB: &str = "flushdb";
const OPT_PXAT: &str = "pxat";

/// When appended records are flushed to stable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// fsync after every write.
    #[default]
    Always,
    /// fsync on a write at most once per second, and on close.
    EverySecond,
    /// Leave flushing to the OS.
    Never,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineOptions {
    pub sync_policy: SyncPolicy,
    pub auto_compact_min_size: u64,
    pub auto_compact_percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Set {
        key: String,
        value: String,
        expires_at: Option<i64>,
    },
    Del {
        key: String,
    },
    FlushDb,
}

impl Command {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Set {
                key,
                value,
                expires_at: None,
            } => encode_array(buf, &[CMD_SET, key, value]),
            Self::Set {
                key,
                value,
                expires_at: Some(at),
            } => {
                let at = at.to_string();
                encode_array(buf, &[CMD_SET, key, value, OPT_PXAT, &at]);
            }
            Self::Del { key } => encode_array(buf, &[CMD_DEL, key]),
            Self::FlushDb => encode_array(buf, &[CMD_FLUSHDB]),
        }
    }
}

fn encode_array(buf: &mut BytesMut, args: &[&str]) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg.as_bytes());
        buf.put_slice(b"\r\n");
    }
}

// ── Parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    pub offset: usize,
    pub reason: String,
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn fail<T>(&self, start: usize, reason: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            offset: start,
            reason: reason.into(),
        })
    }

    /// Parse one command. On failure `pos` is left unspecified; the
    /// caller stops at the returned offset.
    fn next_command(&mut self) -> Result<Command, ParseError> {
        let start = self.pos;
        let count = self.header(b'*', start)?;
        if count == 0 {
            return self.fail(start, "empty command");
        }

        // Every bulk string takes at least `$0\r\n\r\n`.
        let remaining = self.buf.len().saturating_sub(self.pos);
        if count > remaining / 6 {
            return self.fail(start, format!("argument count {count} exceeds remaining input"));
        }

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.bulk_string(start)?);
        }

        let name = args[0].to_ascii_lowercase();
        match (name.as_str(), args.len()) {
            (CMD_SET, 3) => {
                let mut it = args.into_iter().skip(1);
                Ok(Command::Set {
                    key: it.next().unwrap_or_default(),
                    value: it.next().unwrap_or_default(),
                    expires_at: None,
                })
            }
            (CMD_SET, 5) if args[3].eq_ignore_ascii_case(OPT_PXAT) => {
                let Ok(at) = args[4].parse::<i64>() else {
                    return self.fail(start, format!("invalid pxat value {:?}", args[4]));
                };
                let mut it = args.into_iter().skip(1);
                Ok(Command::Set {
                    key: it.next().unwrap_or_default(),
                    value: it.next().unwrap_or_default(),
                    expires_at: Some(at),
                })
            }
            (CMD_DEL, 2) => Ok(Command::Del {
                key: args.into_iter().nth(1).unwrap_or_default(),
            }),
            (CMD_FLUSHDB, 1) => Ok(Command::FlushDb),
            (other, n) => self.fail(start, format!("unknown command {other:?} with {n} args")),
        }
    }

    /// `<marker><decimal>\r\n`
    fn header(&mut self, marker: u8, start: usize) -> Result<usize, ParseError> {
        if self.buf.get(self.pos) != Some(&marker) {
            return self.fail(start, format!("expected '{}'", marker as char));
        }
        self.pos += 1;

        let digits_start = self.pos;
        while self.buf.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        let digits = &self.buf[digits_start..self.pos];
        if digits.is_empty() {
            return self.fail(start, "missing length");
        }
        let n = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok());
        let Some(n) = n else {
            return self.fail(start, "length out of range");
        };

        self.crlf(start)?;
        Ok(n)
    }

    fn bulk_string(&mut self, start: usize) -> Result<String, ParseError> {
        let len = self.header(b'$', start)?;
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return self.fail(start, "truncated bulk string");
        };

        let Ok(s) = std::str::from_utf8(&self.buf[self.pos..end]) else {
            return self.fail(start, "bulk string is not UTF-8");
        };
        let s = s.to_owned();
        self.pos = end;
        self.crlf(start)?;
        Ok(s)
    }

    fn crlf(&mut self, start: usize) -> Result<(), ParseError> {
        if self.buf.get(self.pos..self.pos + 2) == Some(b"\r\n".as_slice()) {
            self.pos += 2;
            Ok(())
        } else {
            self.fail(start, "expected CRLF")
        }
    }
}

// ── Keyspace ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub value: String,
    pub expires_at: Option<i64>,
    /// Bytes this entry's `set` record occupies in the log.
    pub encoded_len: u64,
}

impl Item {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }
}

/// In-memory keyspace rebuilt from the log.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    pub items: BTreeMap<String, Item>,
    pub live_size: u64,
}

impl Keyspace {
    pub(crate) fn apply(&mut self, cmd: Command, encoded_len: u64) {
        match cmd {
            Command::Set {
                key,
                value,
                expires_at,
            } => {
                let item = Item {
                    value,
                    expires_at,
                    encoded_len,
                };
                self.live_size += encoded_len;
                if let Some(old) = self.items.insert(key, item) {
                    self.live_size -= old.encoded_len;
                }
            }
            Command::Del { key } => {
                if let Some(old) = self.items.remove(&key) {
                    self.live_size -= old.encoded_len;
                }
            }
            Command::FlushDb => {
                self.items.clear();
                self.live_size = 0;
            }
        }
    }

    /// Replay a log body. Returns the keyspace built from every command
    /// before the first parse error, together with that error.
    pub(crate) fn replay(buf: &[u8]) -> (Self, Option<ParseError>) {
        let mut keyspace = Self::default();
        let mut parser = Parser::new(buf);

        while !parser.is_done() {
            let start = parser.pos;
            match parser.next_command() {
                Ok(cmd) => keyspace.apply(cmd, (parser.pos - start) as u64),
                Err(e) => return (keyspace, Some(e)),
            }
        }
        (keyspace, None)
    }

    /// Encode every unexpired entry as a fresh log body.
    pub(crate) fn snapshot(&self, now_ms: i64) -> BytesMut {
        let mut buf = BytesMut::new();
        for (key, item) in &self.items {
            if item.is_expired(now_ms) {
                continue;
            }
            Command::Set {
                key: key.clone(),
                value: item.value.clone(),
                expires_at: item.expires_at,
            }
            .encode(&mut buf);
        }
        buf
    }
}

// ── Engine ───────────────────────────────────────────────────────────

pub(crate) struct Engine {
    path: PathBuf,
    file: File,
    keyspace: Keyspace,
    file_size: u64,
    options: EngineOptions,
    last_sync: Instant,
    unsynced: bool,
}

impl Engine {
    /// Open (or create) the log at `path` and replay it.
    ///
    /// A log that does not parse to the end yields `Error::Corrupted`.
    pub(crate) fn open(path: &Path, options: EngineOptions) -> Result<Self, Error> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(Error::io(dir))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(Error::io(path))?;

        let mut body = Vec::new();
        file.read_to_end(&mut body).map_err(Error::io(path))?;

        let (keyspace, err) = Keyspace::replay(&body);
        if let Some(e) = err {
            return Err(Error::Corrupted {
                path: path.to_path_buf(),
                offset: e.offset,
                reason: e.reason,
            });
        }

        debug!(
            path = %path.display(),
            keys = keyspace.items.len(),
            file_size = body.len(),
            live_size = keyspace.live_size,
            "log replayed"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            keyspace,
            file_size: body.len() as u64,
            options,
            last_sync: Instant::now(),
            unsynced: false,
        })
    }

    pub(crate) fn get(&self, key: &str, now_ms: i64) -> Option<&str> {
        self.keyspace
            .items
            .get(key)
            .filter(|item| !item.is_expired(now_ms))
            .map(|item| item.value.as_str())
    }

    /// Unexpired keys starting with `prefix`, ascending.
    pub(crate) fn keys_with_prefix(&self, prefix: &str, now_ms: i64) -> Vec<String> {
        self.keyspace
            .items
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, item)| !item.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Unexpired keys in `[from, to)`, ascending.
    pub(crate) fn keys_in_range(&self, from: &str, to: &str, now_ms: i64) -> Vec<String> {
        if from >= to {
            return Vec::new();
        }
        self.keyspace
            .items
            .range::<str, _>((Bound::Included(from), Bound::Excluded(to)))
            .filter(|(_, item)| !item.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn execute(&mut self, cmd: Command) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        cmd.encode(&mut buf);

        self.file.write_all(&buf).map_err(Error::io(&self.path))?;
        self.file_size += buf.len() as u64;
        self.keyspace.apply(cmd, buf.len() as u64);
        self.unsynced = true;
        self.maybe_sync()?;

        if self.should_compact() {
            info!(
                path = %self.path.display(),
                file_size = self.file_size,
                live_size = self.keyspace.live_size,
                "auto-compacting"
            );
            self.compact(now_ms())?;
        }
        Ok(())
    }

    /// Rewrite the log with only live entries.
    pub(crate) fn compact(&mut self, now_ms: i64) -> Result<(), Error> {
        let body = self.keyspace.snapshot(now_ms);
        let tmp = with_suffix(&self.path, ".compact");
        write_synced(&tmp, &body)?;
        fs::rename(&tmp, &self.path).map_err(Error::io(&self.path))?;

        self.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(Error::io(&self.path))?;

        let (keyspace, _) = Keyspace::replay(&body);
        self.keyspace = keyspace;
        self.file_size = body.len() as u64;
        self.unsynced = false;
        self.last_sync = Instant::now();

        debug!(path = %self.path.display(), file_size = self.file_size, "compacted");
        Ok(())
    }

    pub(crate) fn close(mut self) -> Result<(), Error> {
        if self.unsynced && self.options.sync_policy != SyncPolicy::Never {
            self.sync()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn sizes(&self) -> (u64, u64) {
        (self.file_size, self.keyspace.live_size)
    }

    fn maybe_sync(&mut self) -> Result<(), Error> {
        match self.options.sync_policy {
            SyncPolicy::Always => self.sync(),
            SyncPolicy::EverySecond if self.last_sync.elapsed().as_secs() >= 1 => self.sync(),
            SyncPolicy::EverySecond | SyncPolicy::Never => Ok(()),
        }
    }

    fn sync(&mut self) -> Result<(), Error> {
        self.file.sync_data().map_err(Error::io(&self.path))?;
        self.last_sync = Instant::now();
        self.unsynced = false;
        Ok(())
    }

    fn should_compact(&self) -> bool {
        let EngineOptions {
            auto_compact_min_size,
            auto_compact_percentage,
            ..
        } = self.options;

        if auto_compact_percentage == 0 || self.file_size < auto_compact_min_size {
            return false;
        }
        if self.file_size == 0 {
            return false;
        }
        let wasted = self.file_size.saturating_sub(self.keyspace.live_size);
        wasted * 100 / self.file_size > u64::from(auto_compact_percentage)
    }
}

pub(crate) fn write_synced(path: &Path, body: &[u8]) -> Result<(), Error> {
    let mut file = File::create(path).map_err(Error::io(path))?;
    file.write_all(body).map_err(Error::io(path))?;
    file.sync_all().map_err(Error::io(path))
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options() -> EngineOptions {
        EngineOptions {
            sync_policy: SyncPolicy::Always,
            auto_compact_min_size: 0,
            auto_compact_percentage: 0,
        }
    }

    fn set(key: &str, value: &str) -> Command {
        Command::Set {
            key: key.into(),
            value: value.into(),
            expires_at: None,
        }
    }

    #[test]
    fn encodes_resp_arrays() {
        let mut buf = BytesMut::new();
        set("b:k", "\"v\"").encode(&mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nset\r\n$3\r\nb:k\r\n$3\r\n\"v\"\r\n");

        buf.clear();
        Command::Set {
            key: "k".into(),
            value: "1".into(),
            expires_at: Some(1_700_000_000_000),
        }
        .encode(&mut buf);
        assert_eq!(
            &buf[..],
            b"*5\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\n1\r\n$4\r\npxat\r\n$13\r\n1700000000000\r\n"
        );
    }

    #[test]
    fn replay_applies_commands_in_order() {
        let mut buf = BytesMut::new();
        set("a", "1").encode(&mut buf);
        set("b", "2").encode(&mut buf);
        set("a", "3").encode(&mut buf);
        Command::Del { key: "b".into() }.encode(&mut buf);

        let (ks, err) = Keyspace::replay(&buf);
        assert!(err.is_none());
        assert_eq!(ks.items.len(), 1);
        assert_eq!(ks.items["a"].value, "3");
        assert_eq!(ks.live_size, ks.items["a"].encoded_len);
    }

    #[test]
    fn replay_stops_at_first_bad_record() {
        let mut buf = BytesMut::new();
        set("a", "1").encode(&mut buf);
        let good = buf.len();
        set("b", "2").encode(&mut buf);
        buf.truncate(buf.len() - 2);
        buf.put_slice(b"\n\n");

        let (ks, err) = Keyspace::replay(&buf);
        let err = err.unwrap();
        assert_eq!(err.offset, good);
        assert_eq!(ks.items.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn replay_rejects_unknown_commands() {
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &["hset", "a", "b", "c"]);
        let (_, err) = Keyspace::replay(&buf);
        assert!(err.unwrap().reason.contains("unknown command"));
    }

    #[test]
    fn replay_rejects_oversized_array_header() {
        let mut buf = BytesMut::new();
        set("b:a", "1").encode(&mut buf);
        let good = buf.len();
        buf.put_slice(b"*18446744073709551615\r\n");

        let (ks, err) = Keyspace::replay(&buf);
        let err = err.unwrap();
        assert_eq!(err.offset, good);
        assert!(err.reason.contains("exceeds remaining input"));
        assert_eq!(ks.items["b:a"].value, "1");
    }

    #[test]
    fn flushdb_clears_keyspace() {
        let mut buf = BytesMut::new();
        set("a", "1").encode(&mut buf);
        Command::FlushDb.encode(&mut buf);
        set("b", "2").encode(&mut buf);

        let (ks, _) = Keyspace::replay(&buf);
        assert_eq!(ks.items.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn expired_entries_are_hidden_and_compacted_away() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(&dir.path().join("t.db"), options()).unwrap();

        engine.execute(set("live", "1")).unwrap();
        engine
            .execute(Command::Set {
                key: "old".into(),
                value: "2".into(),
                expires_at: Some(1_000),
            })
            .unwrap();

        assert_eq!(engine.get("old", 2_000), None);
        assert_eq!(engine.get("old", 500), Some("2"));
        assert_eq!(engine.keys_with_prefix("", 2_000), vec!["live"]);

        engine.compact(2_000).unwrap();
        assert_eq!(engine.keys_with_prefix("", 0), vec!["live"]);
    }

    #[test]
    fn auto_compaction_reclaims_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut engine = Engine::open(
            &path,
            EngineOptions {
                sync_policy: SyncPolicy::Never,
                auto_compact_min_size: 256,
                auto_compact_percentage: 50,
            },
        )
        .unwrap();

        for i in 0..100 {
            engine.execute(set("counter", &i.to_string())).unwrap();
        }

        let (file_size, live_size) = engine.sizes();
        assert!(file_size < 512, "file grew to {file_size}");
        assert!(live_size <= file_size);
        assert_eq!(engine.get("counter", 0), Some("99"));
        assert_eq!(fs::metadata(&path).unwrap().len(), file_size);
    }

    #[test]
    fn reopen_sees_previous_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");

        let mut engine = Engine::open(&path, options()).unwrap();
        engine.execute(set("x:1", "a")).unwrap();
        engine.execute(set("x:2", "b")).unwrap();
        engine.execute(set("y:1", "c")).unwrap();
        engine.close().unwrap();

        let engine = Engine::open(&path, options()).unwrap();
        assert_eq!(engine.keys_with_prefix("x:", 0), vec!["x:1", "x:2"]);
        assert_eq!(engine.keys_in_range("x:1", "y:1", 0), vec!["x:1", "x:2"]);
    }
}
