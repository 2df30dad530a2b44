//! Load/save pipeline: streaming reads into a buffer and ranged writes
//! out of one.
//!
//! Reads funnel through the store's replace path so counters and marks
//! stay consistent chunk by chunk; a poll hook between chunks allows
//! user-requested cancellation, after which already-committed content
//! stays committed and the call reports failure. Writes stream borrowed
//! rope chunks and never mutate the buffer beyond the bookkeeping flags a
//! successful whole-buffer write implies.
//!
//! The pipeline also owns load/save *policy*: idempotent loads keyed by
//! absolute path, reload-as-one-undo-step, missing-trailing-newline
//! normalization (reversed symmetrically on save), and the tiered unload
//! rules.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use core_buffer::{BufferId, BufferStore, FreeOutcome, Spot};
use thiserror::Error;
use tracing::{info, warn};

const CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("read into {0} vetoed")]
    Vetoed(String),
    #[error("interrupted")]
    Canceled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0} readonly")]
    ReadOnly(PathBuf),
    #[error("{0} exists")]
    Exists(PathBuf),
    #[error("write to {0} vetoed")]
    Vetoed(PathBuf),
    #[error("interrupted")]
    Canceled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("{0} is used internally by the editor")]
    Internal(String),
    #[error("no file name for {0}")]
    NoFileName(String),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub lines: usize,
    pub chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub lines: usize,
    pub chars: usize,
}

/// Stream `src` into the buffer at `at`, chunk by chunk, through the edit
/// path. `poll` is consulted between chunks; returning `true` cancels the
/// read, leaving whatever was already committed in place.
///
/// Chunk boundaries may split a UTF-8 sequence; the tail bytes of an
/// incomplete char are carried into the next chunk rather than inserted.
pub fn read_into<R, P>(
    store: &mut BufferStore,
    mut at: Spot,
    mut src: R,
    mut poll: P,
) -> Result<ReadStats, ReadError>
where
    R: Read,
    P: FnMut() -> bool,
{
    let start_lines = store.buffer(at.buffer).lines();
    let start_chars = store.buffer(at.buffer).chars();
    let mut raw = [0u8; CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = src.read(&mut raw)?;
        if n == 0 {
            break;
        }
        if poll() {
            warn!(target: "io.read", buffer = ?at.buffer, "read interrupted");
            return Err(ReadError::Canceled);
        }
        pending.extend_from_slice(&raw[..n]);
        let valid_to = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            // an incomplete sequence at the end waits for the next chunk
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e).into()),
        };
        if valid_to > 0 {
            let text = std::str::from_utf8(&pending[..valid_to]).expect("validated prefix");
            let chars = text.chars().count();
            store.replace(at, at, text);
            at.offset += chars;
            pending.drain(..valid_to);
        }
    }
    if !pending.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "truncated UTF-8 sequence at end of input",
        )
        .into());
    }

    let buf = store.buffer(at.buffer);
    Ok(ReadStats {
        lines: buf.lines() - start_lines,
        chars: buf.chars() - start_chars,
    })
}

/// Read a file into the buffer at `at`, bracketed by the pre/post read
/// notifications (the pre-hook may veto).
pub fn read_file<P>(
    store: &mut BufferStore,
    at: Spot,
    path: &Path,
    poll: P,
) -> Result<ReadStats, ReadError>
where
    P: FnMut() -> bool,
{
    if !store.events().pre_read(at.buffer, path) {
        return Err(ReadError::Vetoed(path.display().to_string()));
    }
    let file = File::open(path)?;
    let stats = read_into(store, at, file, poll)?;
    store
        .events()
        .post_read(at.buffer, at.offset, at.offset + stats.chars);
    info!(
        target: "io.read",
        path = %path.display(),
        lines = stats.lines,
        chars = stats.chars,
        "read complete"
    );
    Ok(stats)
}

/// Create a buffer for `path` and load the file into it, or return the
/// existing buffer untouched when it is already loaded and `reload` is
/// false.
///
/// A caller-supplied `name` marks the buffer internal (scripts, help
/// text); user file loads derive the buffer name from the absolute path.
/// Reloading arms undo and clears first, so the whole reload is a single
/// undo step and prior mark offsets can be restored from its snapshot. A
/// missing trailing newline is normalized and tracked in the
/// partial-last-line flag. On read failure the buffer is returned empty
/// with its flags telling the story.
pub fn load<P>(
    store: &mut BufferStore,
    name: Option<&str>,
    path: &Path,
    reload: bool,
    poll: P,
) -> BufferId
where
    P: FnMut() -> bool,
{
    let internal = name.is_some();
    let owned;
    let bufname = match name {
        Some(n) => n,
        None => {
            owned = std::path::absolute(path)
                .unwrap_or_else(|_| path.to_path_buf())
                .display()
                .to_string();
            &owned
        }
    };
    let id = store.alloc(Some(bufname), None, internal);

    if store.buffer(id).chars() > 0 {
        if !reload {
            return id;
        }
        // keep the old text as an undo version, then clear
        store.arm(Spot::new(id, 0));
        let end = store.buffer(id).chars();
        store.replace(Spot::new(id, 0), Spot::new(id, end), "");
    }

    {
        let opts = store.options_mut(id);
        opts.filename = Some(path.to_path_buf());
        opts.edited = true;
        opts.newfile = false;
    }
    match fs::metadata(path) {
        Ok(md) => {
            if md.permissions().readonly() || md.is_dir() {
                store.options_mut(id).readonly = true;
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            store.options_mut(id).newfile = true;
        }
        Err(_) => {
            store.options_mut(id).readonly = true;
        }
    }

    if store.buffer(id).options().newfile {
        info!(target: "io.read", path = %path.display(), "new file");
    } else if let Err(err) = read_file(store, Spot::new(id, 0), path, poll) {
        warn!(target: "io.read", path = %path.display(), %err, "read failed");
        store.options_mut(id).edited = false;
        return id;
    }

    // normalize a missing trailing newline
    let chars = store.buffer(id).chars();
    if chars > 0 && store.buffer(id).text().char_at(chars - 1) != Some('\n') {
        store.replace(Spot::new(id, chars), Spot::new(id, chars), "\n");
        store.options_mut(id).partial_last_line = true;
    } else {
        store.options_mut(id).partial_last_line = false;
    }

    store.options_mut(id).modified = false;

    // put marks back where they were before a reload (best effort; marks
    // newer than the snapshot end up clamped to end-of-buffer)
    store.restore_marks_from_undo(id);
    store.set_cursor(Spot::new(id, 0));
    id
}

/// Search a platform path list for `filename` and load it under
/// `bufname`. Returns the existing buffer immediately if `bufname` is
/// already known; `None` when the file is found nowhere on the path.
pub fn load_from_path<P>(
    store: &mut BufferStore,
    path_list: &str,
    filename: &str,
    bufname: &str,
    mut poll: P,
) -> Option<BufferId>
where
    P: FnMut() -> bool,
{
    if let Some(id) = store.find(bufname) {
        return Some(id);
    }
    for dir in std::env::split_paths(path_list) {
        let candidate = if dir.as_os_str().is_empty() {
            PathBuf::from(filename)
        } else {
            dir.join(filename)
        };
        if candidate.is_file() {
            return Some(load(store, Some(bufname), &candidate, true, &mut poll));
        }
    }
    None
}

/// Write the range `[from, to)` to `path`. Refuses to overwrite a
/// readonly target or an existing file unless `force` is set. A
/// successful whole-buffer write to the buffer's own file clears the
/// modified flag and refreshes the readonly/edited flags.
pub fn write<P>(
    store: &mut BufferStore,
    from: Spot,
    to: Spot,
    path: &Path,
    force: bool,
    poll: P,
) -> Result<WriteStats, WriteError>
where
    P: FnMut() -> bool,
{
    write_range(store, from, to, path, force, false, poll)
}

/// Append the range `[from, to)` to an existing (or new) file.
pub fn append_to<P>(
    store: &mut BufferStore,
    from: Spot,
    to: Spot,
    path: &Path,
    poll: P,
) -> Result<WriteStats, WriteError>
where
    P: FnMut() -> bool,
{
    write_range(store, from, to, path, false, true, poll)
}

fn write_range<P>(
    store: &mut BufferStore,
    from: Spot,
    mut to: Spot,
    path: &Path,
    force: bool,
    append: bool,
    mut poll: P,
) -> Result<WriteStats, WriteError>
where
    P: FnMut() -> bool,
{
    assert_eq!(from.buffer, to.buffer, "write endpoints in different buffers");
    assert!(from.offset <= to.offset, "inverted write range");
    let id = from.buffer;
    let chars_total = store.buffer(id).chars();
    assert!(to.offset <= chars_total, "write range past end of buffer");

    let whole = from.offset == 0 && to.offset == chars_total;
    let same_file = store.buffer(id).options().filename.as_deref() == Some(path);

    if !append && whole && same_file && store.buffer(id).options().readonly && !force {
        return Err(WriteError::ReadOnly(path.to_path_buf()));
    }
    {
        let o = store.buffer(id).options();
        if (o.newfile || !o.edited || !same_file || !whole)
            && !force
            && !append
            && path.exists()
        {
            return Err(WriteError::Exists(path.to_path_buf()));
        }
    }

    if !store.events().pre_write(id, from.offset, to.offset, path) {
        return Err(WriteError::Vetoed(path.to_path_buf()));
    }

    // the newline synthesized for a partial last line is withheld when
    // the whole buffer goes back out
    if whole {
        let keep_partial = store.buffer(id).options().partial_last_line
            && chars_total > 0
            && store.buffer(id).text().char_at(chars_total - 1) == Some('\n');
        if keep_partial {
            to.offset = chars_total - 1;
        } else {
            store.options_mut(id).partial_last_line = false;
        }
    }

    let mut file = if append {
        OpenOptions::new().create(true).append(true).open(path)?
    } else {
        File::create(path)?
    };
    for chunk in store.buffer(id).text().chunks(from.offset, to.offset) {
        if poll() {
            warn!(target: "io.write", path = %path.display(), "write interrupted");
            return Err(WriteError::Canceled);
        }
        file.write_all(chunk.as_bytes())?;
    }
    file.flush()?;

    let stats = {
        let text = store.buffer(id).text();
        WriteStats {
            lines: text.line_of(to.offset) - text.line_of(from.offset),
            chars: to.offset - from.offset,
        }
    };
    store.events().post_write(id, path);
    if append {
        info!(target: "io.write", path = %path.display(), lines = stats.lines, "appended");
    } else {
        info!(
            target: "io.write",
            path = %path.display(),
            lines = stats.lines,
            chars = stats.chars,
            "wrote"
        );
    }

    if whole && !append {
        // a buffer with no filename has one now
        if store.buffer(id).options().filename.is_none() && !store.buffer(id).is_internal() {
            let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            store.options_mut(id).filename = Some(path.to_path_buf());
            store.rename(id, &abs.display().to_string());
        }
        store.options_mut(id).modified = false;
        store.options_mut(id).newfile = false;
        // overwriting the original file proves it isn't readonly
        if store.buffer(id).options().filename.as_deref() == Some(path) {
            let opts = store.options_mut(id);
            opts.readonly = false;
            opts.edited = true;
        }
    }
    Ok(stats)
}

/// Write a buffer to its own file if needed. Trivially succeeds when the
/// buffer is unmodified and the write wasn't explicitly demanded.
pub fn save<P>(
    store: &mut BufferStore,
    id: BufferId,
    force: bool,
    must_write: bool,
    poll: P,
) -> Result<(), SaveError>
where
    P: FnMut() -> bool,
{
    let buf = store.buffer(id);
    if buf.is_internal() {
        return Err(SaveError::Internal(buf.name().to_string()));
    }
    if !must_write && !buf.is_modified() {
        return Ok(());
    }
    let Some(path) = buf.options().filename.clone() else {
        return Err(SaveError::NoFileName(buf.name().to_string()));
    };
    let end = buf.chars();
    write(store, Spot::new(id, 0), Spot::new(id, end), &path, force, poll)?;
    Ok(())
}

/// Free a buffer without losing anything important.
///
/// Retained when internal, viewed, or retain-flagged without `force`.
/// Unmodified buffers free immediately; modified ones free when forced
/// (readonly/nameless) or when `save_first` manages to write them back.
pub fn unload<P>(
    store: &mut BufferStore,
    id: BufferId,
    force: bool,
    save_first: bool,
    poll: P,
) -> FreeOutcome
where
    P: FnMut() -> bool,
{
    let buf = store.buffer(id);
    if buf.is_internal() || buf.viewer_count() > 0 {
        return FreeOutcome::Retained;
    }
    if buf.options().retain && !force {
        return FreeOutcome::Retained;
    }
    if !buf.is_modified() {
        return store.free(id);
    }
    if buf.options().readonly || buf.options().filename.is_none() {
        if force {
            return store.free(id);
        }
        return FreeOutcome::Retained;
    }
    if save_first {
        let path = store
            .buffer(id)
            .options()
            .filename
            .clone()
            .expect("checked above");
        let end = store.buffer(id).chars();
        match write(store, Spot::new(id, 0), Spot::new(id, end), &path, force, poll) {
            Ok(_) => return store.free(id),
            Err(err) => {
                warn!(target: "io.write", %err, "unload write-back failed");
            }
        }
    }
    FreeOutcome::Retained
}
