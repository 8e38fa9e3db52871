//! Video output through the system ffmpeg.

use std::ffi::OsString;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use log::{debug, warn};

use super::{EncodeError, EncodedOutput, FrameEncoder, RgbFrame, rasterize};
use crate::render::FramePlot;
use crate::schema::{OutputFormat, RenderSettings};

/// ffmpeg arguments reading raw RGB frames of `size` from stdin.
pub fn ffmpeg_args(format: OutputFormat, size: (u32, u32), fps: u32, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(format!("{}x{}", size.0, size.1).into());
    args.push("-r".into());
    args.push(fps.to_string().into());
    args.push("-i".into());
    args.push("-".into());
    if format == OutputFormat::Mp4 {
        // yuv420p needs even dimensions
        for arg in ["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2", "-pix_fmt", "yuv420p"] {
            args.push(arg.into());
        }
    }
    args.push(output.as_os_str().to_owned());
    args
}

struct Running {
    child: Child,
    stdin: ChildStdin,
    size: (u32, u32),
}

/// Pipes rasterised frames into ffmpeg. The process starts with the first
/// frame, whose size fixes the video size.
///
/// Dropping an encoder that did not finish successfully kills ffmpeg and
/// removes the partial file.
pub struct VideoEncoder {
    path: PathBuf,
    format: OutputFormat,
    settings: RenderSettings,
    running: Option<Running>,
    frames: usize,
    spawned: bool,
    finished: bool,
}

impl VideoEncoder {
    pub fn new(path: &Path, format: OutputFormat, settings: &RenderSettings) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            settings: settings.clone(),
            running: None,
            frames: 0,
            spawned: false,
            finished: false,
        }
    }

    fn spawn(&mut self, size: (u32, u32)) -> Result<Running, EncodeError> {
        let program = &self.settings.ffmpeg_path;
        debug!("Starting {} for {} at {}x{}", program.display(), self.path.display(), size.0, size.1);
        let mut child = Command::new(program)
            .args(ffmpeg_args(self.format, size, self.settings.fps, &self.path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                program: program.clone(),
                source,
            })?;
        self.spawned = true;
        let stdin = child.stdin.take().ok_or_else(|| EncodeError::Ffmpeg {
            path: self.path.clone(),
            status: "no stdin".to_string(),
            stderr: String::new(),
        })?;
        Ok(Running { child, stdin, size })
    }

    /// Write one already rasterised frame.
    pub fn push_frame(&mut self, frame: &RgbFrame) -> Result<(), EncodeError> {
        let running = match self.running.take() {
            Some(running) => running,
            None => self.spawn(frame.size())?,
        };
        if running.size != frame.size() {
            let expected = running.size;
            self.running = Some(running);
            return Err(EncodeError::FrameSize {
                expected,
                actual: frame.size(),
            });
        }

        let mut running = running;
        if let Err(e) = running.stdin.write_all(&frame.pixels) {
            // ffmpeg exited early; its stderr says why
            let Running { child, stdin, .. } = running;
            drop(stdin);
            return Err(self.collect(child).err().unwrap_or(EncodeError::Io {
                path: self.path.clone(),
                source: e,
            }));
        }
        self.running = Some(running);
        self.frames += 1;
        Ok(())
    }

    fn collect(&self, mut child: Child) -> Result<(), EncodeError> {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).map_err(EncodeError::io(&self.path))?;
        }
        let status = child.wait().map_err(EncodeError::io(&self.path))?;
        if status.success() {
            Ok(())
        } else {
            Err(EncodeError::Ffmpeg {
                path: self.path.clone(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

impl FrameEncoder for VideoEncoder {
    fn push(&mut self, plot: &FramePlot) -> Result<(), EncodeError> {
        let frame = rasterize(plot, self.settings.panel_size)?;
        self.push_frame(&frame)
    }

    fn finish(mut self: Box<Self>) -> Result<EncodedOutput, EncodeError> {
        let Running { child, stdin, size } =
            self.running.take().ok_or_else(|| EncodeError::Empty(self.path.clone()))?;
        drop(stdin);
        self.collect(child)?;
        self.finished = true;

        Ok(EncodedOutput {
            path: self.path.clone(),
            format: self.format,
            frames: self.frames,
            width: size.0,
            height: size.1,
        })
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        if let Some(Running { mut child, stdin, .. }) = self.running.take() {
            drop(stdin);
            let _ = child.kill();
            let _ = child.wait();
        }
        if self.spawned && !self.finished {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed partial {}", self.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove partial {}: {}", self.path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_mp4_arguments() {
        let args = strings(&ffmpeg_args(OutputFormat::Mp4, (1440, 520), 5, Path::new("out/a.mp4")));
        let size = args.iter().position(|a| a == "-s").unwrap();
        assert_eq!(args[size + 1], "1440x520");
        let rate = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[rate + 1], "5");
        assert!(args.contains(&"yuv420p".to_string()));
        assert_eq!(args.last().unwrap(), "out/a.mp4");
    }

    #[test]
    fn test_gif_arguments() {
        let args = strings(&ffmpeg_args(OutputFormat::Gif, (480, 520), 10, Path::new("a.gif")));
        assert!(!args.contains(&"yuv420p".to_string()));
        assert_eq!(args.last().unwrap(), "a.gif");
    }

    #[test]
    fn test_missing_ffmpeg_fails_on_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RenderSettings {
            ffmpeg_path: dir.path().join("no-such-ffmpeg"),
            ..RenderSettings::default()
        };
        let mut encoder = VideoEncoder::new(&dir.path().join("a.mp4"), OutputFormat::Mp4, &settings);
        let frame = RgbFrame {
            width: 2,
            height: 2,
            pixels: vec![0; 12],
        };
        assert!(matches!(encoder.push_frame(&frame), Err(EncodeError::Spawn { .. })));
    }

    #[test]
    fn test_finish_without_frames() {
        let encoder = Box::new(VideoEncoder::new(
            Path::new("a.gif"),
            OutputFormat::Gif,
            &RenderSettings::default(),
        ));
        assert!(matches!(encoder.finish(), Err(EncodeError::Empty(_))));
    }

    /// A stand-in for ffmpeg: writes the output file, drains stdin and
    /// exits with `code`.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join(format!("ffmpeg-{code}"));
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nfor arg in \"$@\"; do out=\"$arg\"; done\nprintf partial > \"$out\"\ncat > /dev/null\nexit {code}\n"
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn encode_two_frames(ffmpeg: PathBuf, output: &Path) -> Result<EncodedOutput, EncodeError> {
        let settings = RenderSettings {
            ffmpeg_path: ffmpeg,
            ..RenderSettings::default()
        };
        let mut encoder = Box::new(VideoEncoder::new(output, OutputFormat::Gif, &settings));
        let frame = RgbFrame {
            width: 2,
            height: 2,
            pixels: vec![7; 12],
        };
        encoder.push_frame(&frame)?;
        encoder.push_frame(&frame)?;
        encoder.finish()
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_encode_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("ok.gif");
        let encoded = encode_two_frames(fake_ffmpeg(dir.path(), 0), &output).unwrap();
        assert_eq!(encoded.frames, 2);
        assert_eq!((encoded.width, encoded.height), (2, 2));
        assert!(output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_encode_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("broken.gif");
        let err = encode_two_frames(fake_ffmpeg(dir.path(), 3), &output).unwrap_err();
        assert!(matches!(err, EncodeError::Ffmpeg { .. }), "{err:?}");
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_abandoned_encoder_stops_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("abandoned.gif");
        let settings = RenderSettings {
            ffmpeg_path: fake_ffmpeg(dir.path(), 0),
            ..RenderSettings::default()
        };
        let mut encoder = VideoEncoder::new(&output, OutputFormat::Gif, &settings);
        let frame = RgbFrame {
            width: 2,
            height: 2,
            pixels: vec![7; 12],
        };
        encoder.push_frame(&frame).unwrap();
        // Dropping kills and reaps ffmpeg, then clears whatever it wrote
        drop(encoder);
        assert!(!output.exists());
    }
}
