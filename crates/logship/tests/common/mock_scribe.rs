// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scribe server that stores every message it receives, per category

use logship::scribe::codec::{
    decode_log_call, encode_log_reply, read_frame, ResultCode, MAX_REPLY_FRAME_SIZE,
};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub struct MockScribeServer {
    pub port: u16,
    pub store: Store,
    stop: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockScribeServer {
    pub fn start() -> Self {
        Self::start_on(0, Store::default())
    }

    /// Port 0 picks a free port. Passing the store of a stopped server keeps
    /// its messages.
    pub fn start_on(port: u16, store: Store) -> Self {
        let listener =
            TcpListener::bind(("127.0.0.1", port)).expect("Failed to bind mock scribe server");
        let port = listener.local_addr().expect("Failed to get local addr").port();
        listener
            .set_nonblocking(true)
            .expect("Failed to set nonblocking");

        let stop = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept_thread = {
            let stop = Arc::clone(&stop);
            let connections = Arc::clone(&connections);
            let store = Arc::clone(&store);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false).expect("Failed to set blocking");
                            connections
                                .lock()
                                .unwrap()
                                .push(stream.try_clone().expect("Failed to clone stream"));
                            let store = Arc::clone(&store);
                            thread::spawn(move || serve(stream, store));
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        MockScribeServer {
            port,
            store,
            stop,
            connections,
            accept_thread: Some(accept_thread),
        }
    }

    pub fn messages(&self, category: &str) -> String {
        let store = self.store.lock().unwrap();
        String::from_utf8(store.get(category).cloned().unwrap_or_default()).unwrap()
    }

    /// Closes the listener and every accepted connection.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            handle.join().unwrap();
        }
        for stream in self.connections.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockScribeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(mut stream: TcpStream, store: Store) {
    loop {
        let Ok(frame) = read_frame(&mut stream, MAX_REPLY_FRAME_SIZE * 1024) else {
            return;
        };
        let Ok((seqid, entries)) = decode_log_call(&frame) else {
            return;
        };
        {
            let mut store = store.lock().unwrap();
            for entry in entries {
                store
                    .entry(entry.category)
                    .or_default()
                    .extend_from_slice(&entry.message);
            }
        }
        if stream
            .write_all(&encode_log_reply(seqid, ResultCode::Ok))
            .is_err()
        {
            return;
        }
    }
}
