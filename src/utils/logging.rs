use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Optional append-only transcript log. Each finalized message is written as
/// plain text with a blank separator line, flushed immediately so a crash
/// loses at most the in-flight message.
pub struct LoggingState {
    file_path: Option<String>,
}

impl LoggingState {
    pub fn new(log_file: Option<String>) -> Result<Self, Box<dyn std::error::Error>> {
        let logging = LoggingState {
            file_path: log_file,
        };

        if let Some(path) = &logging.file_path {
            logging.test_file_access(path)?;
            logging.write_session_header(path)?;
        }

        Ok(logging)
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };

        let mut file = OpenOptions::new().create(true).append(true).open(file_path)?;

        // Preserve the message's own line structure, then a blank spacer line
        // to match the on-screen layout.
        for line in content.lines() {
            writeln!(file, "{}", line)?;
        }
        writeln!(file)?;

        file.flush()?;
        Ok(())
    }

    pub fn status_string(&self) -> String {
        match &self.file_path {
            None => "off".to_string(),
            Some(path) => format!(
                "on ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }

    fn write_session_header(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(
            file,
            "-- session started {} --",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(file)?;
        Ok(())
    }

    fn test_file_access(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("cannot open log file {path}: {e}"))?;
        Ok(())
    }
}
