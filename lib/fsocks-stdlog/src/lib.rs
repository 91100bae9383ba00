/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io::{self, IsTerminal, Write};

use chrono::Local;
use flume::{Receiver, Sender};
use slog::{Drain, KV, Level, OwnedKVList, Record};

const DEFAULT_CHANNEL_CAPACITY: usize = 4096;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub struct AsyncLogConfig {
    pub channel_capacity: usize,
    pub thread_name: String,
}

impl AsyncLogConfig {
    pub fn with_name(thread_name: &str) -> Self {
        AsyncLogConfig {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            thread_name: thread_name.to_string(),
        }
    }
}

pub struct StdLogValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: Option<String>,
}

impl StdLogValue {
    fn message_str(&self) -> &str {
        if self.message.is_empty() {
            "()"
        } else {
            &self.message
        }
    }
}

struct KvCollector<'a>(&'a mut Vec<(String, String)>);

impl slog::Serializer for KvCollector<'_> {
    fn emit_arguments(&mut self, key: slog::Key, val: &fmt::Arguments<'_>) -> slog::Result {
        self.0.push((format!("{key}"), val.to_string()));
        Ok(())
    }
}

/// A slog drain that hands formatted records to a dedicated io thread.
///
/// Records are dropped silently if the channel is full or the io thread has gone.
pub struct AsyncStdLogger {
    sender: Sender<StdLogValue>,
    append_code_position: bool,
}

impl Drain for AsyncStdLogger {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> Result<(), slog::Never> {
        let mut kv_pairs = Vec::new();
        let mut collector = KvCollector(&mut kv_pairs);
        let _ = record.kv().serialize(record, &mut collector);
        let _ = values.serialize(record, &mut collector);

        let location = if self.append_code_position {
            Some(format!("{}:{}", record.file(), record.line()))
        } else {
            None
        };

        let v = StdLogValue {
            level: record.level(),
            message: record.msg().to_string(),
            kv_pairs,
            location,
        };
        // full channel or closed io thread, the record is lost either way
        let _ = self.sender.try_send(v);
        Ok(())
    }
}

pub fn new_async_logger(
    async_conf: &AsyncLogConfig,
    append_code_position: bool,
    use_stdout: bool,
) -> AsyncStdLogger {
    let (sender, receiver) = flume::bounded::<StdLogValue>(async_conf.channel_capacity);

    let io_thread = AsyncIoThread { receiver };

    let _detached_thread = std::thread::Builder::new()
        .name(async_conf.thread_name.clone())
        .spawn(move || {
            if use_stdout {
                io_thread.run_with_stdout();
            } else {
                io_thread.run_with_stderr();
            }
        });

    AsyncStdLogger {
        sender,
        append_code_position,
    }
}

struct AsyncIoThread {
    receiver: Receiver<StdLogValue>,
}

impl AsyncIoThread {
    fn write_time<IO: Write>(&self, io: &mut IO) -> io::Result<()> {
        write!(io, "{}", Local::now().format(TIME_FORMAT))
    }

    fn run_with_stderr(self) {
        let stderr = io::stderr();
        if stderr.is_terminal() {
            self.run(stderr, Self::write_console)
        } else {
            self.run(stderr, Self::write_plain)
        }
    }

    fn run_with_stdout(self) {
        let stdout = io::stdout();
        if stdout.is_terminal() {
            self.run(stdout, Self::write_console)
        } else {
            self.run(stdout, Self::write_plain)
        }
    }

    fn run<IO, F>(&self, mut io: IO, format: F)
    where
        IO: Write,
        F: Fn(&Self, &mut Vec<u8>, StdLogValue) -> io::Result<()>,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        while let Ok(v) = self.receiver.recv() {
            buf.clear();
            let _ = format(self, &mut buf, v);
            let _ = io.write_all(&buf);

            while let Ok(v) = self.receiver.try_recv() {
                buf.clear();
                let _ = format(self, &mut buf, v);
                let _ = io.write_all(&buf);
            }

            let _ = io.flush();
        }
    }

    fn write_plain(&self, io: &mut Vec<u8>, v: StdLogValue) -> io::Result<()> {
        self.write_time(io)?;
        write!(io, " {}", v.level)?;
        for (k, v) in &v.kv_pairs {
            write!(io, " {k}: {v},")?;
        }
        write!(io, " {}", v.message_str())?;
        if let Some(location) = &v.location {
            write!(io, " <{location}>")?;
        }
        writeln!(io)
    }

    fn write_console(&self, io: &mut Vec<u8>, v: StdLogValue) -> io::Result<()> {
        use anstyle::{AnsiColor, Color, Style};

        const COLOR_MAGENTA: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta)));
        const COLOR_RED: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
        const COLOR_YELLOW: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
        const COLOR_GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
        const COLOR_CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
        const COLOR_BLUE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Blue)));
        const STYLE_BOLD: Style = Style::new().bold();
        const STYLE_ITALIC: Style = Style::new().italic();

        let bold_s = STYLE_BOLD.render();
        let bold_e = STYLE_BOLD.render_reset();

        self.write_time(io)?;
        let level_color = match v.level {
            Level::Critical => COLOR_MAGENTA,
            Level::Error => COLOR_RED,
            Level::Warning => COLOR_YELLOW,
            Level::Info => COLOR_GREEN,
            Level::Debug => COLOR_CYAN,
            Level::Trace => COLOR_BLUE,
        };
        write!(
            io,
            " {}{}{}",
            level_color.render(),
            v.level,
            level_color.render_reset(),
        )?;

        for (k, v) in &v.kv_pairs {
            write!(io, " {bold_s}{k}{bold_e}={v},")?;
        }

        write!(io, " {bold_s}{}{bold_e}", v.message_str())?;

        if let Some(location) = &v.location {
            write!(
                io,
                " <{}{location}{}>",
                STYLE_ITALIC.render(),
                STYLE_ITALIC.render_reset()
            )?;
        }
        writeln!(io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_thread() -> AsyncIoThread {
        let (_sender, receiver) = flume::bounded(1);
        AsyncIoThread { receiver }
    }

    #[test]
    fn plain_line() {
        let v = StdLogValue {
            level: Level::Warning,
            message: "session reclaimed".to_string(),
            kv_pairs: vec![("worker".to_string(), "1".to_string())],
            location: Some("src/forward/worker.rs:42".to_string()),
        };
        let mut buf = Vec::new();
        io_thread().write_plain(&mut buf, v).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with(
            " WARN worker: 1, session reclaimed <src/forward/worker.rs:42>\n"
        ));
    }

    #[test]
    fn empty_message() {
        let v = StdLogValue {
            level: Level::Info,
            message: String::new(),
            kv_pairs: Vec::new(),
            location: None,
        };
        let mut buf = Vec::new();
        io_thread().write_plain(&mut buf, v).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with(" INFO ()\n"));
    }

    #[test]
    fn drain_to_channel() {
        let (sender, receiver) = flume::bounded(4);
        let drain = AsyncStdLogger {
            sender,
            append_code_position: false,
        };
        let logger = slog::Logger::root(drain.fuse(), slog::o!("component" => "fwd"));
        slog::info!(logger, "started"; "workers" => 4);

        let v = receiver.try_recv().unwrap();
        assert_eq!(v.level, Level::Info);
        assert_eq!(v.message, "started");
        assert!(v.location.is_none());
        assert!(
            v.kv_pairs
                .contains(&("workers".to_string(), "4".to_string()))
        );
        assert!(
            v.kv_pairs
                .contains(&("component".to_string(), "fwd".to_string()))
        );
    }
}
