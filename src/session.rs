use crate::config::{EdaConfig, MergeConfig, PpgConfig, SessionConfig, SubjectMetadata};
use crate::eda_analysis::run_eda_pipeline;
use crate::error::{PipelineError, Result};
use crate::heart_analysis::run_ppg_pipeline;
use crate::merger::merge_features;
use log::{error, info};

enum Job<'a> {
    Eda(&'a EdaConfig),
    Ppg(&'a PpgConfig),
    Merge(&'a MergeConfig),
}

impl Job<'_> {
    fn name(&self) -> &'static str {
        match self {
            Job::Eda(_) => "eda",
            Job::Ppg(_) => "ppg",
            Job::Merge(_) => "merge",
        }
    }

    fn run(&self, subject: &SubjectMetadata) -> Result<()> {
        match self {
            Job::Eda(config) => run_eda_pipeline(config, subject).map(|_| ()),
            Job::Ppg(config) => run_ppg_pipeline(config, subject).map(|_| ()),
            Job::Merge(config) => merge_features(config, subject).map(|_| ()),
        }
    }
}

/// Outcome of every job a session ran, in eda, ppg, merge order
#[derive(Debug, Default)]
pub struct SessionSummary {
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<(&'static str, PipelineError)>,
}

impl SessionSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn failed_names(&self) -> Vec<&'static str> {
        self.failed.iter().map(|(name, _)| *name).collect()
    }
}

/// Run the jobs listed in a session file for its subject.
///
/// A failing job is logged and the rest still run, unless `fail_fast` is set,
/// in which case the first error is returned and later jobs are skipped.
pub fn run_session(session: &SessionConfig, fail_fast: bool) -> Result<SessionSummary> {
    let subject = &session.subject;
    let jobs: Vec<Job> = [
        session.eda.as_ref().map(Job::Eda),
        session.ppg.as_ref().map(Job::Ppg),
        session.merge.as_ref().map(Job::Merge),
    ]
    .into_iter()
    .flatten()
    .collect();
    if jobs.is_empty() {
        return Err(PipelineError::Config(
            "session file lists no eda, ppg or merge job".into(),
        ));
    }

    let mut summary = SessionSummary::default();
    for job in &jobs {
        let name = job.name();
        info!("Starting {} job for subject '{}'", name, subject.id);
        match job.run(subject) {
            Ok(()) => {
                println!("[{}] done", name);
                summary.succeeded.push(name);
            }
            Err(e) => {
                error!("{} job failed: {}", name, e);
                println!("[{}] failed: {}", name, e);
                if fail_fast {
                    return Err(e);
                }
                summary.failed.push((name, e));
            }
        }
    }

    println!("{} of {} jobs succeeded", summary.succeeded.len(), summary.total());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn write_merge_inputs(dir: &Path) -> serde_json::Value {
        let files = [
            ("eda.csv", "EDA_Tonic,EDA_Phasic\n1.5,0.5\n2.5,0.25\n"),
            (
                "ppg.csv",
                "HF_n_PG,LF_n_PG,LFHF_ratio,Total_PG_EB\n40.5,59.5,1.5,900.5\n41.5,58.5,1.4,880.5\n",
            ),
            ("temp.csv", "T1\n33.5\n33.6\n"),
        ];
        for (name, body) in files {
            std::fs::write(dir.join(name), body).unwrap();
        }
        json!({
            "eda": dir.join("eda.csv"),
            "ppg": dir.join("ppg.csv"),
            "temperature": dir.join("temp.csv"),
            "output": dir.join("merged").join("S08.csv"),
        })
    }

    fn session(dir: &Path) -> SessionConfig {
        serde_json::from_value(json!({
            "subject": { "id": "S08", "age": "24", "gender": "F", "bmi": "21.5", "pain_level": "Mild" },
            "eda": { "input": dir.join("absent_EA.csv"), "render_plots": false },
            "merge": write_merge_inputs(dir),
        }))
        .unwrap()
    }

    #[test]
    fn failing_job_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let summary = run_session(&session, false).unwrap();
        assert_eq!(summary.succeeded, vec!["merge"]);
        assert_eq!(summary.failed_names(), vec!["eda"]);
        assert_eq!(summary.total(), 2);
        assert!(summary.failed[0].1.is_missing_file());
        assert!(dir.path().join("merged").join("S08.csv").exists());
    }

    #[test]
    fn fail_fast_returns_first_error_and_skips_later_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let err = run_session(&session, true).unwrap_err();
        assert!(err.is_missing_file());
        assert!(!dir.path().join("merged").join("S08.csv").exists());
    }

    #[test]
    fn session_without_jobs_is_a_config_error() {
        let session: SessionConfig = serde_json::from_value(json!({ "subject": { "id": "S08" } })).unwrap();
        let err = run_session(&session, false).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
