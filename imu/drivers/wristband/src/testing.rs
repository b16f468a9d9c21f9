//! In-memory stand-in for the wristband firmware.

use crate::port::Transport;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const DEVICE_UID: &str = "0A1B2C3D";

#[derive(Default)]
struct Script {
    response: Vec<String>,
    stream: Vec<String>,
}

#[derive(Default)]
struct DeviceState {
    written: Vec<u8>,
    partial: Vec<u8>,
    commands: Vec<String>,
    outbox: VecDeque<u8>,
    scripts: Vec<(String, Script)>,
    silent: bool,
}

impl DeviceState {
    fn queue_line(&mut self, line: &str) {
        self.outbox.extend(line.bytes());
        self.outbox.extend(b"\r\n");
    }

    fn handle(&mut self, command: String) {
        let script = self
            .scripts
            .iter()
            .find(|(name, _)| *name == command)
            .map(|(_, script)| (script.response.clone(), script.stream.clone()));
        self.commands.push(command);
        if self.silent {
            return;
        }

        let (response, stream) = script.unwrap_or_default();
        for line in &response {
            self.queue_line(line);
        }
        self.queue_line("ready");
        for line in &stream {
            self.queue_line(line);
        }
    }
}

/// Answers every command with its scripted lines followed by `ready`.
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that answers `read uid` like real firmware.
    pub fn wristband() -> Self {
        let device = Self::new();
        let uid = format!("uid {}", DEVICE_UID);
        device.respond("read uid", &[uid.as_str()]);
        device
    }

    pub fn respond(&self, command: &str, lines: &[&str]) {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        self.edit_script(command, |script| script.response = lines);
    }

    /// Lines sent right after the `ready` of `command`.
    pub fn stream_after(&self, command: &str, lines: &[&str]) {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        self.edit_script(command, |script| script.stream = lines);
    }

    pub fn go_silent(&self) {
        self.state.lock().unwrap().silent = true;
    }

    pub fn push_line(&self, line: &str) {
        self.state.lock().unwrap().queue_line(line);
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().unwrap().outbox.extend(bytes);
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    fn edit_script(&self, command: &str, edit: impl FnOnce(&mut Script)) {
        let mut state = self.state.lock().unwrap();
        if let Some((_, script)) = state.scripts.iter_mut().find(|(name, _)| name == command) {
            edit(script);
            return;
        }
        let mut script = Script::default();
        edit(&mut script);
        state.scripts.push((command.to_string(), script));
    }
}

impl Read for ScriptedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.outbox.is_empty() {
            drop(state);
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.written.extend_from_slice(buf);
        state.partial.extend_from_slice(buf);
        while let Some(end) = state.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = state.partial.drain(..=end).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            state.handle(command);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
