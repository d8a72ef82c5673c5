// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tailing endpoint that plays back scripted sessions

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What the server does for one accepted connection.
#[derive(Clone, Debug, Default)]
pub struct TailSession {
    pub chunks: Vec<Vec<u8>>,
    /// Close after the last chunk instead of holding the connection open
    pub close: bool,
}

impl TailSession {
    pub fn closing(chunks: &[&[u8]]) -> Self {
        TailSession {
            chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            close: true,
        }
    }

    pub fn holding(chunks: &[&[u8]]) -> Self {
        TailSession {
            chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            close: false,
        }
    }
}

pub struct MockTailServer {
    pub port: u16,
    handshakes: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    held: Arc<Mutex<Vec<TcpStream>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockTailServer {
    /// Connections beyond the scripted sessions are closed right away.
    pub fn start(sessions: Vec<TailSession>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock tail server");
        let port = listener.local_addr().expect("Failed to get local addr").port();
        listener
            .set_nonblocking(true)
            .expect("Failed to set nonblocking");

        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let held = Arc::new(Mutex::new(Vec::new()));

        let accept_thread = {
            let handshakes = Arc::clone(&handshakes);
            let stop = Arc::clone(&stop);
            let held = Arc::clone(&held);
            let mut sessions: VecDeque<TailSession> = sessions.into();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false).expect("Failed to set blocking");
                            let session = sessions.pop_front().unwrap_or(TailSession {
                                chunks: Vec::new(),
                                close: true,
                            });
                            play(stream, session, &handshakes, &held);
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        MockTailServer {
            port,
            handshakes,
            stop,
            held,
            accept_thread: Some(accept_thread),
        }
    }

    pub fn handshakes(&self) -> Vec<String> {
        self.handshakes.lock().unwrap().clone()
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            handle.join().unwrap();
        }
        for stream in self.held.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockTailServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play(
    mut stream: TcpStream,
    session: TailSession,
    handshakes: &Mutex<Vec<String>>,
    held: &Mutex<Vec<TcpStream>>,
) {
    let mut reader = BufReader::new(stream.try_clone().expect("Failed to clone stream"));
    let mut handshake = String::new();
    if reader.read_line(&mut handshake).is_err() {
        return;
    }
    handshakes.lock().unwrap().push(handshake);

    for chunk in &session.chunks {
        if stream.write_all(chunk).is_err() {
            return;
        }
        let _ = stream.flush();
        thread::sleep(Duration::from_millis(20));
    }

    if session.close {
        let _ = stream.shutdown(Shutdown::Both);
    } else {
        held.lock().unwrap().push(stream);
    }
}
