//! Trim/join media operations, implemented as external `ffmpeg`/`ffprobe`
//! subprocess calls (spec §9's collaborator contract — this service
//! shells out rather than linking a media-decoding library).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::buildcfg::MAX_TRIM_DURATION;
use crate::error::MediaError;

/// Abstraction over the trim/join/duration-probe operations so tests can
/// substitute a fake implementation without invoking real binaries.
#[async_trait::async_trait]
pub trait MediaTool: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> Result<f64, MediaError>;
    async fn trim(&self, src: &Path, dest: &Path, start: f64, duration: f64) -> Result<(), MediaError>;
    async fn join(&self, parts: &[PathBuf], dest: &Path) -> Result<(), MediaError>;
}

fn format_hhmmss(total_secs: f64) -> String {
    let total_secs = total_secs.max(0.0);
    let whole = total_secs.floor() as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = total_secs - (hours * 3600 + minutes * 60) as f64;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}

/// Real implementation, shelling out to `ffmpeg`/`ffprobe`.
pub struct FfmpegTool {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl FfmpegTool {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        FfmpegTool {
            ffmpeg_path,
            ffprobe_path,
        }
    }
}

#[async_trait::async_trait]
impl MediaTool for FfmpegTool {
    async fn duration_secs(&self, path: &Path) -> Result<f64, MediaError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| MediaError::VideoInfoError(err.to_string()))?;

        if !output.status.success() {
            return Err(MediaError::VideoInfoError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|err| MediaError::VideoInfoError(err.to_string()))
    }

    async fn trim(&self, src: &Path, dest: &Path, start: f64, duration: f64) -> Result<(), MediaError> {
        if duration <= 0.0 {
            return Err(MediaError::InvalidDuration);
        }
        if duration > MAX_TRIM_DURATION {
            return Err(MediaError::DurationTooLong {
                max: MAX_TRIM_DURATION,
            });
        }

        let source_duration = self.duration_secs(src).await?;
        if start + duration > source_duration + 0.001 {
            return Err(MediaError::InvalidTrimRange);
        }

        let status = Command::new(&self.ffmpeg_path)
            .args(["-y", "-ss"])
            .arg(format_hhmmss(start))
            .arg("-i")
            .arg(src)
            .args(["-t"])
            .arg(format_hhmmss(duration))
            .args(["-c", "copy"])
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| MediaError::TrimError(err.to_string()))?;

        if !status.status.success() {
            return Err(MediaError::TrimError(
                String::from_utf8_lossy(&status.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn join(&self, parts: &[PathBuf], dest: &Path) -> Result<(), MediaError> {
        if parts.len() < 2 {
            return Err(MediaError::NotEnoughParts);
        }

        let list_file = dest.with_extension("concat_list.txt");
        let list_contents: String = parts
            .iter()
            .map(|p| format!("file '{}'\n", p.display()))
            .collect();
        tokio::fs::write(&list_file, list_contents)
            .await
            .map_err(|err| MediaError::JoinError(err.to_string()))?;

        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_file)
            .args(["-c", "copy"])
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| MediaError::JoinError(err.to_string()));

        let _ = tokio::fs::remove_file(&list_file).await;
        let output = output?;

        if !output.status.success() {
            return Err(MediaError::JoinError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
