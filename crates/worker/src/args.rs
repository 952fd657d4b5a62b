use std::path::PathBuf;

use clap::Parser;
use hubqueue_core::kind::JobKind;

/// Run image-processing jobs against the remote service and save the results.
#[derive(Debug, Parser)]
#[command(name = "hubqueue-worker", version)]
pub struct Args {
    /// JSON kind table: `{"<kind>": {credential, app_id, template, ...}}`.
    #[arg(long, env = "KINDS_FILE", default_value = "kinds.json")]
    pub kinds: PathBuf,

    /// Directory result files are written to.
    #[arg(long, default_value = "results")]
    pub out: PathBuf,

    /// A job as `KIND:SLOT=PATH[,SLOT=PATH...][@STYLE]`. Repeatable.
    #[arg(long = "job", value_name = "SPEC", required = true, value_parser = parse_job_spec)]
    pub jobs: Vec<JobSpec>,
}

/// One job from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub inputs: Vec<(String, PathBuf)>,
    pub style: Option<String>,
}

pub fn parse_job_spec(raw: &str) -> Result<JobSpec, String> {
    let (kind, rest) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:SLOT=PATH, got {raw:?}"))?;
    let kind: JobKind = kind.trim().parse().map_err(|e| format!("{e}"))?;

    let (inputs, style) = match rest.rsplit_once('@') {
        Some((inputs, style)) if !style.trim().is_empty() => {
            (inputs, Some(style.trim().to_string()))
        }
        Some(_) => return Err(format!("empty style in {raw:?}")),
        None => (rest, None),
    };

    let inputs = inputs
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (slot, path) = part
                .split_once('=')
                .ok_or_else(|| format!("expected SLOT=PATH, got {part:?}"))?;
            let (slot, path) = (slot.trim(), path.trim());
            if slot.is_empty() || path.is_empty() {
                return Err(format!("expected SLOT=PATH, got {part:?}"));
            }
            Ok((slot.to_string(), PathBuf::from(path)))
        })
        .collect::<Result<Vec<_>, String>>()?;

    if inputs.is_empty() {
        return Err(format!("no inputs in {raw:?}"));
    }

    Ok(JobSpec {
        kind,
        inputs,
        style,
    })
}
