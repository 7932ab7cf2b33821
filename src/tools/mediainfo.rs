use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::subprocess::SHORT_COMMAND_TIMEOUT;

use super::StatusSink;

/// Mediainfo probe (§11 supplemented feature, §6 `/mediainfo`): a single
/// non-interactive `mediainfo` invocation against the downloaded or
/// replied-to file, returning its textual report. Not listed in §4's
/// component list because it has no processing stages of its own — it is
/// one more Tool Dispatch recipe, same `(task, inputs, status_sink)` shape
/// as every other tool.
pub async fn probe<S: StatusSink>(input: &Path, cancel: CancellationToken, status: &S) -> EngineResult<String> {
    status.update("probing media metadata").await;
    let output = crate::subprocess::run("mediainfo", &[input.display().to_string()], None, cancel, Some(SHORT_COMMAND_TIMEOUT), |_| {}).await?;
    if !output.success() {
        return Err(EngineError::media_format("mediainfo", &output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SilentSink;

    #[tokio::test]
    async fn missing_input_file_surfaces_as_an_error_not_a_panic() {
        let result = probe(Path::new("/nonexistent/path.mp4"), CancellationToken::new(), &SilentSink).await;
        assert!(result.is_err());
    }
}
