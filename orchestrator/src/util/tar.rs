//! Operations related to TAR archives

use bytes::BytesMut;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_tar::Header;

/// Spawn a task packing the given in-memory `files` into a tar archive.
///
/// Each item is a `(path inside the archive, file content)` pair. Returns the
/// tar stream to read from and the join handle to the packing task.
pub fn tar_with_files(
    files: Vec<(String, Vec<u8>)>,
) -> (
    impl Stream<Item = Result<BytesMut, std::io::Error>> + 'static,
    JoinHandle<Result<(), std::io::Error>>,
) {
    let (pipe_recv, pipe_send) = tokio::io::duplex(8192);
    let read_codec = tokio_util::codec::BytesCodec::new();
    let frame = tokio_util::codec::FramedRead::new(pipe_send, read_codec);

    let archiving = tokio::spawn(async move {
        let mut tar = tokio_tar::Builder::new(pipe_recv);
        for (name, content) in files {
            let mut header = Header::new_gnu();
            header.set_path(&name)?;
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_slice()).await?;
        }
        tar.finish().await?;
        Ok(())
    });

    (frame, archiving)
}
