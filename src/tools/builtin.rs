//! Local implementation of the built-in tools.
//!
//! File tools resolve relative paths against the thread's working directory.
//! Output is capped so a single call cannot flood the model context.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineSettings;
use crate::error::{ConvoyError, Result};
use crate::provider::http::shared_client;

use super::arguments::{resolve_path, BuiltinCall};
use super::executor::ToolExecutor;

const COMMAND_OUTPUT_MAX_BYTES: usize = 32_768;
const READ_FILE_MAX_BYTES: usize = 65_536;
const SEARCH_OUTPUT_MAX_BYTES: usize = 32_768;
const FETCH_MAX_BYTES: usize = 65_536;

pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

fn cap(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut out = truncate_utf8(s, max_bytes);
    out.push_str("\n... (truncated)");
    out
}

/// Runs built-in tools with tokio fs/process and the shared HTTP client.
#[derive(Debug, Clone)]
pub struct LocalToolExecutor {
    shell_timeout: Duration,
}

impl Default for LocalToolExecutor {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

impl LocalToolExecutor {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            shell_timeout: settings.shell_timeout(),
        }
    }

    async fn read_file(&self, path: &str, cwd: Option<&Path>) -> Result<String> {
        let full = resolve_path(path, cwd);
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ConvoyError::tool("read_file", format!("{path}: {e}")))?;
        Ok(cap(&content, READ_FILE_MAX_BYTES))
    }

    async fn list_directory(&self, path: Option<&str>, cwd: Option<&Path>) -> Result<String> {
        let path = path.unwrap_or(".");
        let full = resolve_path(path, cwd);
        let mut read_dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| ConvoyError::tool("list_directory", format!("{path}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| ConvoyError::tool("list_directory", e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let line = match entry.metadata().await {
                Ok(meta) if meta.is_dir() => format!("{name}/"),
                Ok(meta) => format!("{name} ({} bytes)", meta.len()),
                Err(_) => name,
            };
            entries.push(line);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        Ok(entries.join("\n"))
    }

    async fn search_files(
        &self,
        pattern: &str,
        path: Option<&str>,
        cwd: Option<&Path>,
    ) -> Result<String> {
        let full = resolve_path(path.unwrap_or("."), cwd);
        let output = tokio::process::Command::new("grep")
            .arg("-rnF")
            .arg("--")
            .arg(pattern)
            .arg(&full)
            .output()
            .await
            .map_err(|e| ConvoyError::tool("search_files", e.to_string()))?;

        // grep exits 1 when nothing matched
        match output.status.code() {
            Some(0) => Ok(cap(
                &String::from_utf8_lossy(&output.stdout),
                SEARCH_OUTPUT_MAX_BYTES,
            )),
            Some(1) => Ok("No matches found.".to_string()),
            _ => Err(ConvoyError::tool(
                "search_files",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    async fn write_file(&self, path: &str, content: &str, cwd: Option<&Path>) -> Result<String> {
        let full = resolve_path(path, cwd);
        if let Some(parent) = full.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ConvoyError::tool(
                        "write_file",
                        format!("failed to create directories for {path}: {e}"),
                    )
                })?;
            }
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| ConvoyError::tool("write_file", format!("{path}: {e}")))?;
        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }

    async fn edit_file(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
        cwd: Option<&Path>,
    ) -> Result<String> {
        let full = resolve_path(path, cwd);
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ConvoyError::tool("edit_file", format!("{path}: {e}")))?;

        match content.matches(old_string).count() {
            0 => Err(ConvoyError::tool(
                "edit_file",
                format!("old_string not found in {path}"),
            )),
            1 => {
                let updated = content.replacen(old_string, new_string, 1);
                tokio::fs::write(&full, updated)
                    .await
                    .map_err(|e| ConvoyError::tool("edit_file", format!("{path}: {e}")))?;
                Ok(format!("Edited {path}"))
            }
            n => Err(ConvoyError::tool(
                "edit_file",
                format!("old_string occurs {n} times in {path}; include more surrounding context"),
            )),
        }
    }

    async fn run_command(&self, command: &str, cwd: Option<&Path>) -> Result<String> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.shell_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ConvoyError::tool("run_command", e.to_string())),
            Err(_) => {
                return Err(ConvoyError::tool(
                    "run_command",
                    format!("command timed out after {}s", self.shell_timeout.as_secs()),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = cap(&format!("{stdout}{stderr}"), COMMAND_OUTPUT_MAX_BYTES);
        match output.status.code() {
            Some(0) => {}
            Some(code) => combined.push_str(&format!("\n[exit code {code}]")),
            None => combined.push_str("\n[terminated by signal]"),
        }
        if combined.is_empty() {
            combined.push_str("(no output)");
        }
        Ok(combined)
    }

    async fn web_fetch(&self, url: &str) -> Result<String> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ConvoyError::tool("web_fetch", format!("invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConvoyError::tool(
                "web_fetch",
                format!("unsupported URL scheme: {}", parsed.scheme()),
            ));
        }

        let resp = shared_client()?
            .get(parsed)
            .send()
            .await
            .map_err(|e| ConvoyError::tool("web_fetch", e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ConvoyError::tool("web_fetch", e.to_string()))?;
        if !status.is_success() {
            return Err(ConvoyError::tool(
                "web_fetch",
                format!("HTTP {}: {}", status.as_u16(), truncate_utf8(&body, 512)),
            ));
        }
        Ok(cap(&body, FETCH_MAX_BYTES))
    }
}

#[async_trait]
impl ToolExecutor for LocalToolExecutor {
    async fn execute(&self, call: &BuiltinCall, cwd: Option<&Path>) -> Result<String> {
        tracing::debug!(tool_name = call.tool_name(), "executing built-in tool");
        match call {
            BuiltinCall::ReadFile { path } => self.read_file(path, cwd).await,
            BuiltinCall::ListDirectory { path } => self.list_directory(path.as_deref(), cwd).await,
            BuiltinCall::SearchFiles { pattern, path } => {
                self.search_files(pattern, path.as_deref(), cwd).await
            }
            BuiltinCall::WriteFile { path, content } => self.write_file(path, content, cwd).await,
            BuiltinCall::EditFile {
                path,
                old_string,
                new_string,
            } => self.edit_file(path, old_string, new_string, cwd).await,
            BuiltinCall::RunCommand { command } => self.run_command(command, cwd).await,
            BuiltinCall::WebFetch { url } => self.web_fetch(url).await,
        }
    }
}
