//! Tesseract recognition engine
//!
//! Pipes the binarized band to the `tesseract` CLI as PNG on stdin and reads
//! TSV from stdout.

use async_trait::async_trait;
use image::{GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::ocr::{EngineFactory, Recognition, RecognitionError, TextRecognizer};

/// Tesseract invocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Executable name or path
    pub executable: PathBuf,
    /// Optional tessdata directory
    pub tessdata_dir: Option<PathBuf>,
    /// Language code
    pub language: String,
    /// Page segmentation mode (6 = single uniform block)
    pub psm: u8,
    /// Optional character whitelist
    pub whitelist: Option<String>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            tessdata_dir: None,
            language: "eng".to_string(),
            psm: 6,
            whitelist: None,
        }
    }
}

/// Text recognizer backed by the Tesseract CLI
pub struct TesseractEngine {
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// Factory for [`RecognitionService`](super::ocr::RecognitionService)
    pub fn factory(config: TesseractConfig) -> EngineFactory {
        Box::new(move || Ok(Box::new(TesseractEngine::new(config.clone())) as Box<dyn TextRecognizer>))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        cmd.arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.language)
            .arg("--psm")
            .arg(self.config.psm.to_string());
        if let Some(dir) = &self.config.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        if let Some(whitelist) = &self.config.whitelist {
            cmd.arg("-c").arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        cmd.arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TextRecognizer for TesseractEngine {
    async fn recognize(&mut self, image: &GrayImage) -> Result<Recognition, RecognitionError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RecognitionError::Engine(format!("PNG encoding failed: {}", e)))?;

        let mut child = self.command().spawn().map_err(|e| {
            RecognitionError::Unavailable(format!("{}: {}", self.config.executable.display(), e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|e| RecognitionError::Engine(format!("Failed to write image: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RecognitionError::Engine(format!("Tesseract did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Engine(format!("Tesseract failed: {}", stderr.trim())));
        }

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("Tesseract: {:?} ({:.0})", recognition.text, recognition.confidence);
        Ok(recognition)
    }
}

/// Collapse Tesseract TSV into line-joined text and mean word confidence
fn parse_tsv(tsv: &str) -> Recognition {
    let mut lines: Vec<((i32, i32, i32), Vec<&str>)> = Vec::new();
    let mut conf_sum = 0.0f32;
    let mut words = 0usize;

    // Fields: level, page, block, par, line, word, left, top, width, height, conf, text
    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }

        let text = fields[11].trim();
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        match lines.last_mut() {
            Some((last, line_words)) if *last == key => line_words.push(text),
            Some(_) | None => lines.push((key, vec![text])),
        }

        conf_sum += conf;
        words += 1;
    }

    let text = lines
        .iter()
        .map(|(_, line_words)| line_words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    Recognition {
        text,
        confidence: if words > 0 { conf_sum / words as f32 } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_lines_and_confidence() {
        let tsv = format!(
            "{}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t200\t40\t-1\t\n\
             5\t1\t1\t1\t1\t1\t2\t2\t50\t20\t91.5\t130/204\n\
             5\t1\t1\t1\t1\t2\t60\t2\t20\t20\t80.5\tEN\n\
             5\t1\t1\t1\t2\t1\t2\t25\t10\t20\t70\t7\n",
            HEADER
        );

        let recognition = parse_tsv(&tsv);
        assert_eq!(recognition.text, "130/204 EN\n7");
        assert!((recognition.confidence - 80.666_67).abs() < 0.01);
    }

    #[test]
    fn test_parse_tsv_empty_output() {
        let recognition = parse_tsv(HEADER);
        assert_eq!(recognition.text, "");
        assert_eq!(recognition.confidence, 0.0);
    }

    #[test]
    fn test_command_arguments() {
        let engine = TesseractEngine::new(TesseractConfig {
            whitelist: Some("0123456789/".to_string()),
            ..TesseractConfig::default()
        });
        let cmd = engine.command();
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.first().map(String::as_str), Some("stdin"));
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
        assert!(args.contains(&"tessedit_char_whitelist=0123456789/".to_string()));
    }

    #[tokio::test]
    async fn test_missing_executable_is_unavailable() {
        let mut engine = TesseractEngine::new(TesseractConfig {
            executable: PathBuf::from("/nonexistent/tesseract-binary"),
            ..TesseractConfig::default()
        });
        let result = engine.recognize(&GrayImage::new(4, 4)).await;
        assert!(matches!(result, Err(RecognitionError::Unavailable(_))));
    }
}
