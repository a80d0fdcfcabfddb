//! `ffmpeg` invocations: video transcode and poster-frame extraction.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;
use tracing::debug;

use tmm_core::{errors::Error, Result};

const STDERR_TAIL_MAX_LINES: usize = 20;
const STDERR_TAIL_MAX_BYTES: usize = 4 * 1024;

/// A concrete ffmpeg command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FfmpegInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// H.264 transcode at a fixed bitrate, original resolution, audio copied.
pub fn transcode_invocation(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    bitrate: &str,
) -> FfmpegInvocation {
    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-b:v".to_string(),
        bitrate.to_string(),
        "-bufsize".to_string(),
        bitrate.to_string(),
        "-vf".to_string(),
        "scale=iw:ih".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        output.to_string_lossy().to_string(),
    ];
    FfmpegInvocation {
        program: ffmpeg.to_path_buf(),
        args,
    }
}

/// Single frame one second in, as JPEG.
pub fn frame_invocation(ffmpeg: &Path, input: &Path, output: &Path) -> FfmpegInvocation {
    let args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        "00:00:01.000".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-vframes".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "4".to_string(),
        output.to_string_lossy().to_string(),
    ];
    FfmpegInvocation {
        program: ffmpeg.to_path_buf(),
        args,
    }
}

/// Run an invocation to completion. Any failure is a `Error::Conversion`.
pub async fn run(inv: &FfmpegInvocation) -> Result<()> {
    debug!(program = %inv.program.display(), args = ?inv.args, "running ffmpeg");

    let output = Command::new(&inv.program)
        .args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            Error::Conversion(format!(
                "failed to start ffmpeg ({}): {e}",
                inv.program.display()
            ))
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = stderr_tail(&String::from_utf8_lossy(&output.stderr));
    if stderr.trim().is_empty() {
        return Err(Error::Conversion(format!(
            "ffmpeg exited with status {}",
            output.status
        )));
    }
    Err(Error::Conversion(format!(
        "ffmpeg exited with status {}\nstderr (tail):\n{stderr}",
        output.status
    )))
}

/// Last lines of stderr, bounded in both lines and bytes.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_MAX_LINES);
    let mut tail = lines[start..].join("\n");
    if tail.len() > STDERR_TAIL_MAX_BYTES {
        let mut cut = tail.len() - STDERR_TAIL_MAX_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail = tail[cut..].to_string();
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcode_args_match_delivery_profile() {
        let inv = transcode_invocation(
            Path::new("/usr/bin/ffmpeg"),
            Path::new("/tmp/in"),
            Path::new("/tmp/out.mp4"),
            "500k",
        );
        assert_eq!(inv.program, PathBuf::from("/usr/bin/ffmpeg"));
        assert_eq!(
            inv.args.join(" "),
            "-y -i /tmp/in -c:v libx264 -b:v 500k -bufsize 500k -vf scale=iw:ih -c:a copy -loglevel error /tmp/out.mp4"
        );
    }

    #[test]
    fn frame_args_seek_one_second() {
        let inv = frame_invocation(
            Path::new("ffmpeg"),
            Path::new("/tmp/v.mp4"),
            Path::new("/tmp/f.jpg"),
        );
        let joined = inv.args.join(" ");
        assert!(joined.contains("-ss 00:00:01.000 -i /tmp/v.mp4"));
        assert!(joined.ends_with("-vframes 1 -q:v 4 /tmp/f.jpg"));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let long = (0..100).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = stderr_tail(&long);
        assert_eq!(tail.lines().count(), STDERR_TAIL_MAX_LINES);
        assert!(tail.ends_with("line 99"));
        assert!(!tail.contains("line 79\n"));
    }

    #[tokio::test]
    async fn missing_binary_is_conversion_error() {
        let inv = FfmpegInvocation {
            program: PathBuf::from("/nonexistent/ffmpeg-for-tests"),
            args: vec!["-version".to_string()],
        };
        let err = run(&inv).await.unwrap_err();
        assert!(matches!(err, Error::Conversion(ref m) if m.contains("failed to start ffmpeg")));
    }
}
