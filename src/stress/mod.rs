//! Internal stress tests for pipelining.
//!
//! These tests push large batches and many independent sessions through an
//! in-process server built from the crate's own codec.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::core::builder::ClientBuilder;
use crate::core::command;
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::Commands;

type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

fn apply(store: &Store, frame: Frame) -> Frame {
    let args: Vec<Bytes> = match frame {
        Frame::Array(Some(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Frame::BulkString(Some(b)) => Some(b),
                _ => None,
            })
            .collect(),
        _ => return Frame::Error(b"ERR format".to_vec()),
    };
    let Some(name) = args.first() else {
        return Frame::Error(b"ERR empty command".to_vec());
    };
    let mut store = store.lock().unwrap();
    match name.to_ascii_uppercase().as_slice() {
        b"PING" => Frame::status("PONG"),
        b"SET" if args.len() == 3 => {
            store.insert(args[1].clone(), args[2].clone());
            Frame::status("OK")
        }
        b"GET" if args.len() == 2 => Frame::BulkString(store.get(&args[1]).cloned()),
        b"INCR" if args.len() == 2 => {
            let current = store
                .get(&args[1])
                .and_then(|v| std::str::from_utf8(v).ok()?.parse::<i64>().ok())
                .unwrap_or(0);
            store.insert(args[1].clone(), Bytes::from((current + 1).to_string()));
            Frame::Integer(current + 1)
        }
        _ => Frame::Error(b"ERR unknown command".to_vec()),
    }
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Store::default();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => break,
            };
            let store = store.clone();

            tokio::spawn(async move {
                let mut decoder = Decoder::new();
                let mut encoder = Encoder::new();
                let mut buf = [0u8; 4096];

                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) => return,
                        Ok(n) => n,
                        Err(_) => return,
                    };

                    decoder.append(&buf[..n]);

                    while let Ok(Some(frame)) = decoder.decode() {
                        encoder.encode(&apply(&store, frame));
                    }
                    if !encoder.is_empty() {
                        let data = encoder.take();
                        if socket.write_all(&data).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    format!("redis://{}", addr)
}

#[tokio::test]
async fn test_large_pipeline_keeps_order() {
    let addr = spawn_server().await;
    let mut client = ClientBuilder::new()
        .address(addr)
        .build()
        .await
        .expect("Failed to connect");

    client.begin_pipeline().unwrap();
    for i in 0..1_000 {
        let key = format!("key:{i}");
        client
            .enqueue(command::set(key.clone(), format!("value:{i}")))
            .await
            .unwrap();
        client.enqueue(command::get(key)).await.unwrap();
    }
    let replies = client.drain().await.unwrap();

    assert_eq!(replies.len(), 2_000);
    for (i, pair) in replies.chunks(2).enumerate() {
        assert_eq!(pair[0], Ok(Frame::status("OK")));
        assert_eq!(pair[1], Ok(Frame::bulk(format!("value:{i}"))));
    }
}

#[tokio::test]
async fn test_many_sessions_in_parallel() {
    let addr = spawn_server().await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let addr = addr.clone();
        handles.push(tokio::spawn(async move {
            let mut client = ClientBuilder::new()
                .address(addr)
                .build()
                .await
                .expect("Failed to connect");
            for _ in 0..20 {
                assert_eq!(client.ping().await.unwrap(), "PONG");
                client.incr("shared").await.unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let mut client = ClientBuilder::new().address(addr).build().await.unwrap();
    assert_eq!(client.get("shared").await.unwrap(), Some(Bytes::from("1000")));
}
