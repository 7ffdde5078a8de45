// Copyright (C) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Black-box coverage of the daemon: speaks the same wire protocol a real
//! client would, against a real `server::run` instance and a real loopback
//! HTTP server, with no internals of the engine reached into directly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UnixStream};
use tokio::time::sleep;

use transfer_engine::config::ServiceConfig;

const BODY: &[u8] = b"hello from the loopback server";

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn frame_request(opcode: u32, bundle: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&opcode.to_le_bytes());
    body.push(0u8); // ManagerPermission::NoPermission
    push_string(&mut body, bundle);
    body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    body.extend_from_slice(payload);

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);
    framed
}

/// Mirrors `config_codec::encode`'s field order so the daemon can rebuild
/// a `TaskConfig` carrying one save-file spec; every other option is left
/// at its default.
fn config_blob(save_name: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_string(&mut buf, "GET"); // method
    push_string(&mut buf, ""); // title
    push_string(&mut buf, ""); // description
    buf.extend_from_slice(&0u32.to_le_bytes()); // header count
    buf.extend_from_slice(&0u32.to_le_bytes()); // form item count

    buf.extend_from_slice(&1u32.to_le_bytes()); // file spec count
    push_string(&mut buf, "file");
    push_string(&mut buf, save_name);
    push_string(&mut buf, save_name);
    push_string(&mut buf, "");
    buf.push(0u8); // is_user_file

    buf.push(0u8); // Mode::Background
    buf.push(10u8); // Version::V10
    buf.push(0u8); // NetworkConfig::Any
    buf.extend_from_slice(&[
        0u8, // overwrite
        1u8, // metered_allowed
        1u8, // roaming_allowed
        0u8, // retry_enabled
        1u8, // redirect_enabled
        0u8, // gauge
        0u8, // precise
        1u8, // background
    ]);
    buf.extend_from_slice(&0u64.to_le_bytes()); // range.begins
    buf.extend_from_slice(&(-1i64).to_le_bytes()); // range.ends
    buf.extend_from_slice(&0u64.to_le_bytes()); // min_speed.speed
    buf.extend_from_slice(&0u64.to_le_bytes()); // min_speed.duration_ms
    buf.extend_from_slice(&60u64.to_le_bytes()); // timeout.connect_timeout_secs
    buf.extend_from_slice(&(7 * 24 * 60 * 60u64).to_le_bytes()); // timeout.total_timeout_secs
    buf
}

fn create_payload(bundle: &str, url: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_string(&mut buf, bundle);
    push_string(&mut buf, url);
    push_string(&mut buf, ""); // token
    buf.push(0u8); // Action::Download
    buf.extend_from_slice(&0u32.to_le_bytes()); // priority
    buf.extend_from_slice(&config_blob("out.bin"));
    buf
}

fn task_id_payload(task_id: u32) -> Vec<u8> {
    task_id.to_le_bytes().to_vec()
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.bytes[self.pos];
        self.pos += 1;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn i32(&mut self) -> i32 {
        let v = i32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn string(&mut self) -> String {
        let len = self.u32() as usize;
        let s = String::from_utf8(self.bytes[self.pos..self.pos + len].to_vec()).unwrap();
        self.pos += len;
        s
    }
}

async fn send_request(socket_path: &std::path::Path, framed: &[u8]) -> Vec<u8> {
    let mut stream = UnixStream::connect(socket_path).await.expect("connect to control socket");
    stream.write_all(framed).await.unwrap();
    let len = stream.read_u32_le().await.unwrap() as usize;
    let mut reply = vec![0u8; len];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

/// Accepts exactly one connection and writes a fixed HTTP/1.1 response,
/// closing the connection once the body is flushed.
async fn serve_one_response(listener: TcpListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut discard = [0u8; 1024];
    let _ = stream.read(&mut discard).await;
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        BODY.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.write_all(BODY).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn created_task_downloads_to_completion_over_the_real_socket() {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let root = std::env::temp_dir().join(format!("transfer_engine_it_{}_{}", std::process::id(), nanos));
    let service_config = ServiceConfig::rooted_at(root);
    let socket_dir = service_config.socket_dir.clone();

    tokio::spawn(transfer_engine::server::run(service_config));

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    tokio::spawn(serve_one_response(http_listener));

    let control_path = socket_dir.join("control.sock");
    let admin_path = socket_dir.join("admin.sock");

    // Give the daemon a moment to bind both sockets before we connect.
    let mut control_stream = None;
    for _ in 0..50 {
        if let Ok(stream) = UnixStream::connect(&control_path).await {
            control_stream = Some(stream);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    drop(control_stream);

    let mut admin_stream = UnixStream::connect(&admin_path).await.expect("connect to admin socket");
    admin_stream.write_all(b"network wifi 0 0\n").await.unwrap();
    admin_stream.flush().await.unwrap();

    let url = format!("http://{http_addr}/file");
    let create_reply = send_request(&control_path, &frame_request(0, "testapp", &create_payload("testapp", &url))).await;
    let mut cursor = Cursor::new(&create_reply);
    assert_eq!(cursor.i32(), 0, "CREATE should succeed");
    let task_id = cursor.u32();

    let start_reply = send_request(&control_path, &frame_request(6, "testapp", &task_id_payload(task_id))).await;
    assert_eq!(Cursor::new(&start_reply).i32(), 0, "START should succeed");

    let mut final_state = None;
    for _ in 0..100 {
        let show_reply = send_request(&control_path, &frame_request(2, "testapp", &task_id_payload(task_id))).await;
        let mut cursor = Cursor::new(&show_reply);
        assert_eq!(cursor.i32(), 0, "SHOW should succeed");
        let _task_id = cursor.u32();
        let _bundle = cursor.string();
        let _url = cursor.string();
        let _mime_type = cursor.string();
        let _action = cursor.u8();
        let _mode = cursor.u8();
        let _ctime = cursor.u64();
        let _mtime = cursor.u64();
        let state = cursor.u8();
        if state == 6 || state == 7 {
            final_state = Some(state);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(final_state, Some(6), "task should reach Completed, not Failed or stuck");
}
