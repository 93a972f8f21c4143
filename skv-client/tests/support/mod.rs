//! In-process RESP2 server covering the commands the client issues.
//!
//! Keys, channels and payloads are kept as raw bytes so binary data written
//! by other tools can be reproduced.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use skv_client::{Config, StoreConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Subscription {
    Channel(Vec<u8>),
    Pattern(Vec<u8>),
}

type Subscriptions = Arc<Mutex<Vec<Subscription>>>;
type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Default)]
struct Keyspace {
    data: BTreeMap<Vec<u8>, Entry>,
    ttls: HashMap<Vec<u8>, u64>,
}

struct State {
    keyspace: Mutex<Keyspace>,
    commands: Mutex<Vec<Vec<String>>>,
    subscribers: Mutex<Vec<Subscriptions>>,
    messages: broadcast::Sender<(Vec<u8>, Vec<u8>)>,
    /// Each SCAN page after the first repeats the last key of the page before.
    repeat_scan: AtomicBool,
    /// QUIT is recorded but never answered.
    silent_quit: AtomicBool,
}

/// Handle to a running fake server.
#[derive(Clone)]
pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<State>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (messages, _) = broadcast::channel(64);
        let state = Arc::new(State {
            keyspace: Mutex::new(Keyspace::default()),
            commands: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            messages,
            repeat_scan: AtomicBool::new(false),
            silent_quit: AtomicBool::new(false),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, accept_state.clone()));
            }
        });

        FakeServer { addr, state }
    }

    pub fn url(&self) -> String {
        format!("redis://{}/", self.addr)
    }

    pub fn store_config(&self, namespace: Option<&str>) -> StoreConfig {
        StoreConfig {
            url: self.url(),
            namespace: namespace.map(str::to_string),
            connect_timeout_ms: 2_000,
            ..StoreConfig::default()
        }
    }

    pub fn config(&self, namespace: Option<&str>) -> Config {
        Config {
            store: self.store_config(namespace),
            ..Config::default()
        }
    }

    /// Makes SCAN return some keys twice, as a real server may while rehashing.
    pub fn repeat_scan_keys(&self) {
        self.state.repeat_scan.store(true, Ordering::SeqCst);
    }

    /// Stops answering QUIT while keeping connections open.
    pub fn ignore_quit(&self) {
        self.state.silent_quit.store(true, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, entry: Entry) {
        self.insert_raw(key.as_bytes(), entry);
    }

    pub fn insert_raw(&self, key: &[u8], entry: Entry) {
        self.state.keyspace.lock().unwrap().data.insert(key.to_vec(), entry);
    }

    pub fn entry(&self, key: &str) -> Option<Entry> {
        self.state.keyspace.lock().unwrap().data.get(key.as_bytes()).cloned()
    }

    /// Stored keys, converted lossily to text.
    pub fn keys(&self) -> Vec<String> {
        self.raw_keys().iter().map(|k| text(k)).collect()
    }

    pub fn raw_keys(&self) -> Vec<Vec<u8>> {
        self.state.keyspace.lock().unwrap().data.keys().cloned().collect()
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.state.keyspace.lock().unwrap().ttls.get(key.as_bytes()).copied()
    }

    /// Subscriptions across all connections that match `channel`.
    pub fn receivers(&self, channel: &[u8]) -> usize {
        count_receivers(&self.state, channel)
    }

    /// Delivers a message to subscribers without going through a client.
    pub fn publish(&self, channel: &[u8], payload: &[u8]) {
        let _ = self.state.messages.send((channel.to_vec(), payload.to_vec()));
    }

    /// Every command received with the given name, arguments included.
    pub fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.first().is_some_and(|cmd| cmd.eq_ignore_ascii_case(name)))
            .cloned()
            .collect()
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<State>) {
    let (mut reader, writer) = stream.into_split();
    let writer: Writer = Arc::new(tokio::sync::Mutex::new(writer));
    let subscriptions: Subscriptions = Arc::new(Mutex::new(Vec::new()));
    let mut forwarding = false;
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        while let Some(args) = parse_command(&mut buffer) {
            state
                .commands
                .lock()
                .unwrap()
                .push(args.iter().map(|arg| text(arg)).collect());
            let cmd = text(&args[0]).to_ascii_uppercase();
            if cmd == "QUIT" && state.silent_quit.load(Ordering::SeqCst) {
                continue;
            }

            let response = match cmd.as_str() {
                "SUBSCRIBE" | "PSUBSCRIBE" => {
                    if !forwarding {
                        forwarding = true;
                        state.subscribers.lock().unwrap().push(subscriptions.clone());
                        spawn_forwarder(&state, subscriptions.clone(), writer.clone());
                    }
                    let kind = cmd.to_ascii_lowercase();
                    let mut out = Vec::new();
                    let mut subs = subscriptions.lock().unwrap();
                    for target in &args[1..] {
                        subs.push(if cmd == "SUBSCRIBE" {
                            Subscription::Channel(target.clone())
                        } else {
                            Subscription::Pattern(target.clone())
                        });
                        out.extend(resp_push(&kind, target, subs.len()));
                    }
                    out
                }
                "UNSUBSCRIBE" => {
                    let mut out = Vec::new();
                    let mut subs = subscriptions.lock().unwrap();
                    for target in &args[1..] {
                        subs.retain(|s| *s != Subscription::Channel(target.clone()));
                        out.extend(resp_push("unsubscribe", target, subs.len()));
                    }
                    out
                }
                "PUBLISH" if args.len() == 3 => {
                    let receivers = count_receivers(&state, &args[1]);
                    let _ = state.messages.send((args[1].clone(), args[2].clone()));
                    resp_integer(receivers as i64)
                }
                _ => dispatch_command(&args, &state),
            };

            let mut out = writer.lock().await;
            if out.write_all(&response).await.is_err() {
                return;
            }
            if cmd == "QUIT" {
                let _ = out.shutdown().await;
                return;
            }
        }
    }
}

fn spawn_forwarder(state: &Arc<State>, subscriptions: Subscriptions, writer: Writer) {
    let mut rx = state.messages.subscribe();
    tokio::spawn(async move {
        while let Ok((channel, payload)) = rx.recv().await {
            let frames: Vec<Vec<u8>> = subscriptions
                .lock()
                .unwrap()
                .iter()
                .filter_map(|sub| match sub {
                    Subscription::Channel(name) if *name == channel => {
                        Some(resp_array(&[b"message".as_slice(), channel.as_slice(), payload.as_slice()]))
                    }
                    Subscription::Pattern(pattern) if glob_match(pattern, &channel) => {
                        Some(resp_array(&[
                            b"pmessage".as_slice(),
                            pattern.as_slice(),
                            channel.as_slice(),
                            payload.as_slice(),
                        ]))
                    }
                    _ => None,
                })
                .collect();
            for frame in frames {
                if writer.lock().await.write_all(&frame).await.is_err() {
                    return;
                }
            }
        }
    });
}

fn count_receivers(state: &State, channel: &[u8]) -> usize {
    state
        .subscribers
        .lock()
        .unwrap()
        .iter()
        .map(|subs| {
            subs.lock()
                .unwrap()
                .iter()
                .filter(|sub| match sub {
                    Subscription::Channel(name) => name == channel,
                    Subscription::Pattern(pattern) => glob_match(pattern, channel),
                })
                .count()
        })
        .sum()
}

fn dispatch_command(args: &[Vec<u8>], state: &State) -> Vec<u8> {
    let mut keyspace = state.keyspace.lock().unwrap();
    let cmd = text(&args[0]).to_ascii_uppercase();

    match (cmd.as_str(), args.len()) {
        ("PING", 1) => resp_simple("PONG"),
        ("PING", 2) => resp_bulk(&args[1]),
        ("CLIENT", _) | ("SELECT", 2) | ("QUIT", 1) => resp_simple("OK"),
        ("SET", 3) => {
            keyspace.data.insert(args[1].clone(), Entry::Str(text(&args[2])));
            keyspace.ttls.remove(&args[1]);
            resp_simple("OK")
        }
        ("SET", 5) if text(&args[3]).eq_ignore_ascii_case("EX") => match text(&args[4]).parse::<u64>() {
            Ok(seconds) if seconds > 0 => {
                keyspace.data.insert(args[1].clone(), Entry::Str(text(&args[2])));
                keyspace.ttls.insert(args[1].clone(), seconds);
                resp_simple("OK")
            }
            _ => resp_error("ERR invalid expire time in 'set' command"),
        },
        ("GET", 2) => match keyspace.data.get(&args[1]) {
            Some(Entry::Str(value)) => resp_bulk(value.as_bytes()),
            Some(Entry::Hash(_)) => resp_wrongtype(),
            None => resp_null(),
        },
        ("DEL", n) if n >= 2 => {
            let mut removed = 0;
            for key in &args[1..] {
                if keyspace.data.remove(key).is_some() {
                    removed += 1;
                }
                keyspace.ttls.remove(key);
            }
            resp_integer(removed)
        }
        ("EXPIRE", 3) => match text(&args[2]).parse::<u64>() {
            Ok(seconds) if keyspace.data.contains_key(&args[1]) => {
                keyspace.ttls.insert(args[1].clone(), seconds);
                resp_integer(1)
            }
            Ok(_) => resp_integer(0),
            Err(_) => resp_error("ERR value is not an integer or out of range"),
        },
        ("TTL", 2) => match (keyspace.data.contains_key(&args[1]), keyspace.ttls.get(&args[1])) {
            (false, _) => resp_integer(-2),
            (true, None) => resp_integer(-1),
            (true, Some(seconds)) => resp_integer(*seconds as i64),
        },
        ("HSET", n) if n >= 4 && n % 2 == 0 => {
            let entry = keyspace
                .data
                .entry(args[1].clone())
                .or_insert_with(|| Entry::Hash(BTreeMap::new()));
            let Entry::Hash(fields) = entry else {
                return resp_wrongtype();
            };
            let mut added = 0;
            for pair in args[2..].chunks(2) {
                if fields.insert(text(&pair[0]), text(&pair[1])).is_none() {
                    added += 1;
                }
            }
            resp_integer(added)
        }
        ("HSET", _) => resp_error("ERR wrong number of arguments for 'hset' command"),
        ("HGETALL", 2) => match keyspace.data.get(&args[1]) {
            Some(Entry::Hash(fields)) => {
                let flat: Vec<&[u8]> = fields
                    .iter()
                    .flat_map(|(f, v)| [f.as_bytes(), v.as_bytes()])
                    .collect();
                resp_array(&flat)
            }
            Some(Entry::Str(_)) => resp_wrongtype(),
            None => resp_array(&[]),
        },
        ("SCAN", _) => handle_scan(args, &keyspace, state.repeat_scan.load(Ordering::SeqCst)),
        _ => resp_error(&format!("ERR unknown command '{}'", text(&args[0]))),
    }
}

/// Cursor is an offset into the sorted keyspace; COUNT bounds the keys
/// examined per call, as on a real server.
fn handle_scan(args: &[Vec<u8>], keyspace: &Keyspace, repeat: bool) -> Vec<u8> {
    let Ok(cursor) = text(&args[1]).parse::<usize>() else {
        return resp_error("ERR invalid cursor");
    };
    let mut pattern: &[u8] = b"*";
    let mut count = 10usize;
    let mut idx = 2;
    while idx + 1 < args.len() {
        match text(&args[idx]).to_ascii_uppercase().as_str() {
            "MATCH" => pattern = args[idx + 1].as_slice(),
            "COUNT" => count = text(&args[idx + 1]).parse().unwrap_or(10).max(1),
            _ => return resp_error("ERR syntax error"),
        }
        idx += 2;
    }

    let all: Vec<&Vec<u8>> = keyspace.data.keys().collect();
    let end = (cursor + count).min(all.len());
    let start = if repeat && cursor > 0 { cursor - 1 } else { cursor };
    let batch: Vec<&[u8]> = all
        .get(start..end)
        .unwrap_or(&[])
        .iter()
        .filter(|key| glob_match(pattern, key))
        .map(|key| key.as_slice())
        .collect();
    let next = if end >= all.len() { 0 } else { end };

    let mut out = b"*2\r\n".to_vec();
    out.extend(resp_bulk(next.to_string().as_bytes()));
    out.extend(resp_array(&batch));
    out
}

/// Glob matching with `*`, `?`, `[...]` classes and backslash escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        Some(b'?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(b'\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_match(&pattern[2..], &text[1..])
        }
        Some(b'[') => match pattern.iter().position(|&b| b == b']') {
            Some(close) if close > 1 => {
                let Some(&ch) = text.first() else {
                    return false;
                };
                let class = &pattern[1..close];
                let (negate, class) = match class.first() {
                    Some(b'^') => (true, &class[1..]),
                    _ => (false, class),
                };
                let mut hit = false;
                let mut i = 0;
                while i < class.len() {
                    if i + 2 < class.len() && class[i + 1] == b'-' {
                        hit |= class[i] <= ch && ch <= class[i + 2];
                        i += 3;
                    } else {
                        hit |= class[i] == ch;
                        i += 1;
                    }
                }
                hit != negate && glob_match(&pattern[close + 1..], &text[1..])
            }
            _ => text.first() == Some(&b'[') && glob_match(&pattern[1..], &text[1..]),
        },
        Some(&p) => text.first() == Some(&p) && glob_match(&pattern[1..], &text[1..]),
    }
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn parse_command(buffer: &mut BytesMut) -> Option<Vec<Vec<u8>>> {
    let (args, used) = parse_array(&buffer[..])?;
    buffer.advance(used);
    Some(args)
}

fn parse_array(data: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let (line, mut pos) = read_line(data, 0)?;
    let count: usize = line.strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (line, start) = read_line(data, pos)?;
        let len: usize = line.strip_prefix('$')?.parse().ok()?;
        let end = start + len;
        if data.len() < end + 2 {
            return None;
        }
        args.push(data[start..end].to_vec());
        pos = end + 2;
    }
    if args.is_empty() {
        return None;
    }
    Some((args, pos))
}

fn read_line(data: &[u8], start: usize) -> Option<(&str, usize)> {
    let rest = data.get(start..)?;
    let len = rest.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&rest[..len]).ok()?;
    Some((line, start + len + 2))
}

fn resp_simple(message: &str) -> Vec<u8> {
    format!("+{message}\r\n").into_bytes()
}

fn resp_error(message: &str) -> Vec<u8> {
    format!("-{message}\r\n").into_bytes()
}

fn resp_wrongtype() -> Vec<u8> {
    resp_error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = format!("${}\r\n", data.len()).into_bytes();
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn resp_array(items: &[&[u8]]) -> Vec<u8> {
    let mut buf = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        buf.extend(resp_bulk(item));
    }
    buf
}

fn resp_push(kind: &str, target: &[u8], count: usize) -> Vec<u8> {
    let mut buf = b"*3\r\n".to_vec();
    buf.extend(resp_bulk(kind.as_bytes()));
    buf.extend(resp_bulk(target));
    buf.extend(resp_integer(count as i64));
    buf
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
