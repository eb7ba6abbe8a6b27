//! Bulk transfers: app install, container push/pull, and container reset.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::{fs, io, thread};
use std::time::Duration;

use handset_proto::{
    Call, Compression, Destination, FileContainer, InstallRequest, InstallResponse, Payload,
    PullRequest, PullResponse, PushRequest, PushResponse, Request, TerminateRequest,
    TerminateResponse,
};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::stream::{self, Ack, RequestStream};

/// Subdirectories every app container must have to launch cleanly.
pub const CONTAINER_DIRS: [&str; 6] = [
    "Documents",
    "Library",
    "Library/Caches",
    "Library/Preferences",
    "SystemData",
    "tmp",
];

/// Container root path.
const ROOT: &str = "/";

/// A rewindable byte source, so an interrupted upload can restart from the
/// beginning.
pub trait BundleSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> BundleSource for T {}

/// Uploads a gzip-compressed app bundle in `chunk_size` pieces.
///
/// The source is rewound to `start` first. Returns once the companion has
/// acknowledged the whole upload.
pub(crate) fn install(
    channel: &Channel,
    source: &mut dyn BundleSource,
    start: u64,
    chunk_size: usize,
) -> Result<()> {
    source.seek(SeekFrom::Start(start))?;

    let conn = channel.open(&Call::Install)?;
    let mut stream: RequestStream<InstallRequest, ()> =
        RequestStream::spawn::<InstallResponse, _>(conn, Ack::new("install"))?;
    stream.send(InstallRequest::Meta {
        destination: Destination::App,
        compression: Compression::Gzip,
    })?;

    let mut chunks = 0usize;
    let mut total = 0u64;
    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        let n = (&mut *source)
            .take(chunk_size as u64)
            .read_to_end(&mut chunk)?;
        if n == 0 {
            break;
        }
        chunks += 1;
        total += n as u64;
        stream.send(InstallRequest::Payload(Payload::Data(chunk)))?;
    }
    tracing::debug!(chunks, bytes = total, "install payload sent");

    stream.complete()
}

/// Copies a file, or every entry of a directory, into the app's container
/// root. The companion resolves each path against the container.
pub(crate) fn push(channel: &Channel, bundle_id: &str, src: &Path) -> Result<()> {
    let files = push_sources(src)?;

    let conn = channel.open(&Call::Push)?;
    let mut stream: RequestStream<PushRequest, ()> =
        RequestStream::spawn::<PushResponse, _>(conn, Ack::new("push"))?;
    stream.send(PushRequest::Inner {
        container: FileContainer::application(bundle_id),
        dst_path: ROOT.into(),
    })?;
    for path in files {
        stream.send(PushRequest::Payload(Payload::FilePath(path)))?;
    }
    stream.complete()
}

/// Absolute paths to push for `src`, sorted for a stable send order.
fn push_sources(src: &Path) -> io::Result<Vec<String>> {
    let src = std::path::absolute(src)?;
    if !fs::metadata(&src)?.is_dir() {
        return Ok(vec![src.to_string_lossy().into_owned()]);
    }
    let mut paths = fs::read_dir(&src)?
        .map(|entry| entry.map(|e| e.path().to_string_lossy().into_owned()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Asks the companion to copy the app's whole container into `dst`.
pub(crate) fn pull(channel: &Channel, bundle_id: &str, dst: &Path) -> Result<()> {
    let dst = std::path::absolute(dst)?;
    let conn = channel.open(&Call::Pull(PullRequest {
        container: FileContainer::application(bundle_id),
        src_path: ROOT.into(),
        dst_path: dst.to_string_lossy().into_owned(),
    }))?;
    stream::drain::<PullResponse, _>(conn, Ack::new("pull"))
}

/// Terminates a running app.
pub(crate) fn terminate(channel: &Channel, bundle_id: &str) -> Result<()> {
    let conn = channel.open(&Call::Terminate(TerminateRequest {
        bundle_id: bundle_id.into(),
    }))?;
    stream::drain::<TerminateResponse, _>(conn, Ack::new("terminate"))
}

/// Resets an app's container to an empty but well-formed state.
///
/// Order: terminate the app, wait `settle` so it cannot write state back,
/// remove the container root, recreate [`CONTAINER_DIRS`]. The result is
/// the removal's; directories that could not be recreated are returned in
/// the `Ok` value for the caller to decide on.
pub(crate) fn clear_app_state(
    session: &Session,
    bundle_id: &str,
    settle: Duration,
) -> Result<Vec<(&'static str, Error)>> {
    if let Err(e) = session.run(|ch| terminate(ch, bundle_id)) {
        tracing::warn!(bundle_id, error = %e, "could not stop app before clearing state");
    }
    thread::sleep(settle);

    let container = FileContainer::application(bundle_id);
    session.run(|ch| {
        ch.unary_ok(Request::Rm {
            container: container.clone(),
            paths: vec![ROOT.into()],
        })
    })?;

    let mut failed = Vec::new();
    for dir in CONTAINER_DIRS {
        let result = session.run(|ch| {
            ch.unary_ok(Request::Mkdir {
                container: container.clone(),
                path: dir.into(),
            })
        });
        if let Err(e) = result {
            tracing::warn!(bundle_id, dir, error = %e, "could not recreate container directory");
            failed.push((dir, e));
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_sources_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("prefs.plist");
        fs::write(&file, b"x").unwrap();
        let paths = push_sources(&file).unwrap();
        assert_eq!(paths, [file.to_string_lossy().into_owned()]);
    }

    #[test]
    fn push_sources_for_directory_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("Library")).unwrap();
        let paths = push_sources(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| Path::new(p).file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["Library", "a.txt", "b.txt"]);
        assert!(paths.iter().all(|p| Path::new(p).is_absolute()));
    }

    #[test]
    fn push_sources_missing_path_is_local_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = push_sources(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
