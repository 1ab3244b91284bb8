//! In-process RESP server for integration tests.
//!
//! Implements a small key-value command set with per-connection session
//! state (database, authentication, MULTI/EXEC with WATCH), records every
//! command it receives and can drop all open sockets on request.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use respite::proto::codec::{encode_frame, Decoder};
use respite::Frame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// What the server does with one command.
pub enum Response {
    /// Reply with a frame.
    Frame(Frame),
    /// Write raw bytes, valid RESP or not.
    Raw(Vec<u8>),
    /// Never reply.
    Silent,
    /// Close the socket without replying.
    Close,
}

/// Overrides the built-in behavior for selected commands. Receives the
/// connection number (starting at 1) and the command arguments.
pub type Hook = Arc<dyn Fn(usize, &[Bytes]) -> Option<Response> + Send + Sync>;

const DATA_COMMANDS: &[&str] = &[
    "PING", "ECHO", "SET", "GET", "MGET", "MSET", "DEL", "EXISTS", "INCR", "INCRBY", "DECR",
    "FLUSHDB", "TYPE",
];

#[derive(Default)]
struct Data {
    values: HashMap<(u32, Bytes), Bytes>,
    versions: HashMap<(u32, Bytes), u64>,
}

impl Data {
    fn touch(&mut self, db: u32, key: &Bytes) {
        *self.versions.entry((db, key.clone())).or_insert(0) += 1;
    }

    fn version(&self, db: u32, key: &Bytes) -> u64 {
        self.versions.get(&(db, key.clone())).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct Session {
    db: u32,
    authed: bool,
    multi: Option<Vec<Vec<Bytes>>>,
    dirty: bool,
    watched: Vec<(Bytes, u64)>,
}

struct Shared {
    data: Mutex<Data>,
    log: Mutex<Vec<(usize, Vec<Bytes>)>>,
    accepted: AtomicUsize,
    open: AtomicUsize,
    password: Option<String>,
    hook: Option<Hook>,
}

/// Handle to a running mock server. The server lives until the test's
/// runtime shuts down.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    kill: broadcast::Sender<()>,
}

impl MockServer {
    /// Starts a server without authentication.
    pub async fn start() -> Self {
        Self::spawn(None, None).await
    }

    /// Starts a server that requires `AUTH <password>`.
    pub async fn with_password(password: &str) -> Self {
        Self::spawn(Some(password.to_string()), None).await
    }

    /// Starts a server whose hook may override any command.
    pub async fn with_hook<F>(hook: F) -> Self
    where
        F: Fn(usize, &[Bytes]) -> Option<Response> + Send + Sync + 'static,
    {
        Self::spawn(None, Some(Arc::new(hook))).await
    }

    async fn spawn(password: Option<String>, hook: Option<Hook>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            data: Mutex::new(Data::default()),
            log: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            password,
            hook,
        });
        let (kill, _) = broadcast::channel(4);

        let accept_shared = shared.clone();
        let accept_kill = kill.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let id = accept_shared.accepted.fetch_add(1, Ordering::SeqCst) + 1;
                accept_shared.open.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    socket,
                    id,
                    accept_shared.clone(),
                    accept_kill.subscribe(),
                ));
            }
        });

        Self { addr, shared, kill }
    }

    /// `redis://` URL of the server.
    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Socket address of the server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Commands received on one connection, rendered as space-joined text.
    pub fn commands_on(&self, connection: usize) -> Vec<String> {
        self.shared
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == connection)
            .map(|(_, args)| {
                args.iter()
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /// Closes every open connection without telling the client, and waits
    /// until the sockets are gone.
    pub async fn kill_connections(&self) {
        let _ = self.kill.send(());
        while self.shared.open.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Let the FIN reach the client side of the loopback.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn serve(
    mut socket: TcpStream,
    id: usize,
    shared: Arc<Shared>,
    mut kill: broadcast::Receiver<()>,
) {
    let mut decoder = Decoder::new();
    let mut session = Session::default();
    let mut buf = vec![0u8; 4096];

    'conn: loop {
        let n = tokio::select! {
            read = socket.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
            _ = kill.recv() => break,
        };
        decoder.append(&buf[..n]);

        let mut out = Vec::new();
        let mut close = false;
        loop {
            let frame = match decoder.decode() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => {
                    close = true;
                    break;
                }
            };
            let args = into_args(frame);
            shared.log.lock().unwrap().push((id, args.clone()));

            let response = shared
                .hook
                .as_ref()
                .and_then(|hook| hook(id, &args))
                .unwrap_or_else(|| Response::Frame(shared.execute(&mut session, &args)));
            match response {
                Response::Frame(frame) => out.extend_from_slice(&encode_frame(&frame)),
                Response::Raw(bytes) => out.extend_from_slice(&bytes),
                Response::Silent => {}
                Response::Close => {
                    close = true;
                    break;
                }
            }
        }

        if !out.is_empty() && socket.write_all(&out).await.is_err() {
            break 'conn;
        }
        if close {
            break 'conn;
        }
    }

    drop(socket);
    shared.open.fetch_sub(1, Ordering::SeqCst);
}

fn into_args(frame: Frame) -> Vec<Bytes> {
    match frame {
        Frame::Array(Some(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Frame::BulkString(Some(b)) => Some(b),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn err(message: &str) -> Frame {
    Frame::Error(message.as_bytes().to_vec())
}

fn ok() -> Frame {
    Frame::status("OK")
}

fn wrong_arity(name: &str) -> Frame {
    err(&format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn parse_int(value: &Bytes) -> Option<i64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

impl Shared {
    fn execute(&self, session: &mut Session, args: &[Bytes]) -> Frame {
        let Some(first) = args.first() else {
            return err("ERR empty command");
        };
        let name = String::from_utf8_lossy(first).to_ascii_uppercase();

        if self.password.is_some() && !session.authed && name != "AUTH" {
            return err("NOAUTH Authentication required.");
        }

        if let Some(queue) = session.multi.as_mut() {
            if !matches!(name.as_str(), "EXEC" | "DISCARD" | "MULTI" | "WATCH") {
                if !DATA_COMMANDS.contains(&name.as_str()) {
                    session.dirty = true;
                    return err(&format!("ERR unknown command '{}'", String::from_utf8_lossy(first)));
                }
                queue.push(args.to_vec());
                return Frame::status("QUEUED");
            }
        }

        match name.as_str() {
            "AUTH" => {
                let Some(password) = args.last().filter(|_| args.len() >= 2) else {
                    return wrong_arity(&name);
                };
                match &self.password {
                    None => err("ERR AUTH <password> called without any password configured for the default user."),
                    Some(expected) if expected.as_bytes() == password.as_ref() => {
                        session.authed = true;
                        ok()
                    }
                    Some(_) => err("WRONGPASS invalid username-password pair or user is disabled."),
                }
            }
            "SELECT" => match args.get(1).and_then(parse_int) {
                Some(db) if (0..16).contains(&db) => {
                    session.db = db as u32;
                    ok()
                }
                Some(_) => err("ERR DB index is out of range"),
                None => err("ERR value is not an integer or out of range"),
            },
            "MULTI" => {
                if session.multi.is_some() {
                    return err("ERR MULTI calls can not be nested");
                }
                session.multi = Some(Vec::new());
                ok()
            }
            "EXEC" => {
                let Some(queue) = session.multi.take() else {
                    return err("ERR EXEC without MULTI");
                };
                let watched = std::mem::take(&mut session.watched);
                if std::mem::take(&mut session.dirty) {
                    return err("EXECABORT Transaction discarded because of previous errors.");
                }
                let mut data = self.data.lock().unwrap();
                if watched
                    .iter()
                    .any(|(key, version)| data.version(session.db, key) != *version)
                {
                    return Frame::Array(None);
                }
                let replies = queue
                    .iter()
                    .map(|cmd| run(&mut data, session.db, cmd))
                    .collect();
                Frame::Array(Some(replies))
            }
            "DISCARD" => {
                if session.multi.take().is_none() {
                    return err("ERR DISCARD without MULTI");
                }
                session.watched.clear();
                session.dirty = false;
                ok()
            }
            "WATCH" => {
                if session.multi.is_some() {
                    return err("ERR WATCH inside MULTI is not allowed");
                }
                let data = self.data.lock().unwrap();
                for key in &args[1..] {
                    session
                        .watched
                        .push((key.clone(), data.version(session.db, key)));
                }
                ok()
            }
            "UNWATCH" => {
                session.watched.clear();
                ok()
            }
            _ if DATA_COMMANDS.contains(&name.as_str()) => {
                run(&mut self.data.lock().unwrap(), session.db, args)
            }
            _ => err(&format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(first)
            )),
        }
    }
}

fn run(data: &mut Data, db: u32, args: &[Bytes]) -> Frame {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let key = |i: usize| (db, args[i].clone());

    match (name.as_str(), args.len()) {
        ("PING", 1) => Frame::status("PONG"),
        ("PING", 2) | ("ECHO", 2) => Frame::BulkString(Some(args[1].clone())),
        ("SET", 3) => {
            data.values.insert(key(1), args[2].clone());
            data.touch(db, &args[1]);
            ok()
        }
        ("GET", 2) => Frame::BulkString(data.values.get(&key(1)).cloned()),
        ("MGET", n) if n >= 2 => Frame::Array(Some(
            (1..n)
                .map(|i| Frame::BulkString(data.values.get(&key(i)).cloned()))
                .collect(),
        )),
        ("MSET", n) if n >= 3 && n % 2 == 1 => {
            for i in (1..n).step_by(2) {
                data.values.insert(key(i), args[i + 1].clone());
                data.touch(db, &args[i]);
            }
            ok()
        }
        ("DEL", n) if n >= 2 => {
            let mut removed = 0;
            for i in 1..n {
                if data.values.remove(&key(i)).is_some() {
                    data.touch(db, &args[i]);
                    removed += 1;
                }
            }
            Frame::Integer(removed)
        }
        ("EXISTS", n) if n >= 2 => Frame::Integer(
            (1..n).filter(|&i| data.values.contains_key(&key(i))).count() as i64,
        ),
        ("INCR", 2) | ("DECR", 2) | ("INCRBY", 3) => {
            let delta = match name.as_str() {
                "INCR" => 1,
                "DECR" => -1,
                _ => match parse_int(&args[2]) {
                    Some(delta) => delta,
                    None => return err("ERR value is not an integer or out of range"),
                },
            };
            let current = match data.values.get(&key(1)) {
                Some(value) => match parse_int(value) {
                    Some(n) => n,
                    None => return err("ERR value is not an integer or out of range"),
                },
                None => 0,
            };
            let next = current + delta;
            data.values.insert(key(1), Bytes::from(next.to_string()));
            data.touch(db, &args[1]);
            Frame::Integer(next)
        }
        ("TYPE", 2) => Frame::status(if data.values.contains_key(&key(1)) {
            "string"
        } else {
            "none"
        }),
        ("FLUSHDB", 1) => {
            let keys: Vec<_> = data
                .values
                .keys()
                .filter(|(d, _)| *d == db)
                .cloned()
                .collect();
            for (d, k) in keys {
                data.values.remove(&(d, k.clone()));
                data.touch(d, &k);
            }
            ok()
        }
        _ => wrong_arity(&name),
    }
}
