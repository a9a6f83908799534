//! Subscriber setup: stderr output plus an optional size-rotated log file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber. `RUST_LOG` overrides `verbosity`.
///
/// A log file that cannot be opened downgrades to stderr-only logging.
pub fn init_logging(verbosity: u8, log_file: Option<(PathBuf, u64)>) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));
	let stderr = fmt::layer().with_target(true).with_writer(io::stderr).compact();

	let (file, open_error) = match log_file {
		Some((path, max_size)) => match RotatingFile::open(&path, max_size) {
			Ok(writer) => (Some(fmt::layer().with_ansi(false).with_target(true).with_writer(writer)), None),
			Err(err) => (None, Some((path, err))),
		},
		None => (None, None),
	};

	let _ = tracing_subscriber::registry().with(filter).with(stderr).with(file).try_init();

	if let Some((path, err)) = open_error {
		warn!(target = "lydia.server", path = %path.display(), error = %err, "log file unavailable; logging to stderr only");
	}
}

fn default_directives(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn,lydia=info",
		1 => "info",
		_ => "debug",
	}
}

/// Append-only log file that moves itself aside once it reaches `max_size`.
#[derive(Debug, Clone)]
pub struct RotatingFile {
	inner: Arc<Mutex<RotatingState>>,
}

#[derive(Debug)]
struct RotatingState {
	path: PathBuf,
	max_size: u64,
	file: File,
	written: u64,
}

impl RotatingFile {
	pub fn open(path: &Path, max_size: u64) -> io::Result<Self> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let file = open_append(path)?;
		let written = file.metadata()?.len();
		Ok(Self {
			inner: Arc::new(Mutex::new(RotatingState {
				path: path.to_path_buf(),
				max_size,
				file,
				written,
			})),
		})
	}
}

impl RotatingState {
	fn rotate(&mut self) -> io::Result<()> {
		self.file.flush()?;
		let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
		let mut rotated = self.path.clone().into_os_string();
		rotated.push(format!(".{stamp}"));
		fs::rename(&self.path, &rotated)?;
		self.file = open_append(&self.path)?;
		self.written = 0;
		Ok(())
	}
}

fn open_append(path: &Path) -> io::Result<File> {
	OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut state = self.inner.lock();
		if state.written > 0 && state.written + buf.len() as u64 > state.max_size {
			state.rotate()?;
		}
		let n = state.file.write(buf)?;
		state.written += n as u64;
		Ok(n)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.lock().file.flush()
	}
}

impl<'a> MakeWriter<'a> for RotatingFile {
	type Writer = RotatingFile;

	fn make_writer(&'a self) -> Self::Writer {
		self.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entries(dir: &Path) -> Vec<String> {
		let mut names: Vec<String> = fs::read_dir(dir)
			.expect("log dir should be readable")
			.map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
			.collect();
		names.sort();
		names
	}

	#[test]
	fn rotates_when_the_next_write_would_overflow() {
		let tmp = tempfile::tempdir().expect("temp dir");
		let path = tmp.path().join("logs").join("instance.log");
		let mut writer = RotatingFile::open(&path, 16).expect("log file should open");

		writer.write_all(b"0123456789\n").expect("first write");
		writer.write_all(b"abcdefghij\n").expect("second write");

		let names = entries(path.parent().expect("parent"));
		assert_eq!(names.len(), 2, "{names:?}");
		assert_eq!(names[0], "instance.log");
		assert!(names[1].starts_with("instance.log."));
		assert_eq!(fs::read_to_string(&path).expect("active log"), "abcdefghij\n");
	}

	#[test]
	fn oversized_first_write_is_kept_whole() {
		let tmp = tempfile::tempdir().expect("temp dir");
		let path = tmp.path().join("instance.log");
		let mut writer = RotatingFile::open(&path, 4).expect("log file should open");

		writer.write_all(b"longer than four\n").expect("write");
		assert_eq!(entries(tmp.path()), vec!["instance.log"]);
	}

	#[test]
	fn reopening_counts_existing_bytes() {
		let tmp = tempfile::tempdir().expect("temp dir");
		let path = tmp.path().join("instance.log");
		fs::write(&path, "0123456789\n").expect("seed log");

		let mut writer = RotatingFile::open(&path, 16).expect("log file should open");
		writer.write_all(b"next line\n").expect("write");

		assert_eq!(entries(tmp.path()).len(), 2);
	}

	#[test]
	fn verbosity_picks_filter_defaults() {
		assert_eq!(default_directives(0), "warn,lydia=info");
		assert_eq!(default_directives(1), "info");
		assert_eq!(default_directives(5), "debug");
	}
}
