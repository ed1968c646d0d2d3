//! Reproduction of the SPM pipeline of team 2T6S.
//!
//! No preprocessing and no run level analysis: the fMRIPrep derivatives of
//! the dataset are used directly. The subject level builds a GLM per
//! subject; the group level fits one-sample models for both groups and a
//! two-sample model comparing them. Every node is a MATLAB batch call.

use std::collections::HashSet;
use std::path::PathBuf;

use super::{under, Pipeline, PipelineDirectories, Stage};
use crate::participants::SubjectId;
use crate::workflow::{CommandNode, Workflow};

const TEAM_ID: &str = "2T6S";
const DEFAULT_MATLAB_COMMAND: &str = "matlab";

/// Smoothing kernel width, in mm.
pub const FWHM: f64 = 8.0;

/// Subject level contrasts: trial, effect of gain, effect of loss.
const SUBJECT_CONTRASTS: [&str; 3] = ["0001", "0002", "0003"];

/// One-sample group analysis methods.
const GROUP_METHODS: [&str; 2] = ["equalIndifference", "equalRange"];

const GROUP_COMPARISON: &str = "groupComp";

/// Files written per contrast by a one-sample group model.
const ONE_SAMPLE_FILES: [&str; 8] = [
    "con_0001.nii",
    "con_0002.nii",
    "mask.nii",
    "SPM.mat",
    "spmT_0001.nii",
    "spmT_0002.nii",
    "_threshold0/spmT_0001_thr.nii",
    "_threshold1/spmT_0002_thr.nii",
];

/// Files written per contrast by the group comparison model.
const TWO_SAMPLE_FILES: [&str; 5] = [
    "con_0001.nii",
    "mask.nii",
    "SPM.mat",
    "spmT_0001.nii",
    "_threshold0/spmT_0001_thr.nii",
];

/// Pipeline of team 2T6S.
#[derive(Debug, Clone)]
pub struct PipelineTeam2T6S {
    directories: PipelineDirectories,
    subject_list: Vec<SubjectId>,
    matlab_command: String,
}

impl Default for PipelineTeam2T6S {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineTeam2T6S {
    pub fn new() -> Self {
        Self {
            directories: PipelineDirectories::default(),
            subject_list: Vec::new(),
            matlab_command: DEFAULT_MATLAB_COMMAND.to_string(),
        }
    }

    /// Overrides the MATLAB executable.
    pub fn with_matlab_command(mut self, command: impl Into<String>) -> Self {
        self.matlab_command = command.into();
        self
    }

    /// Smoothing kernel width used by the subject level model.
    pub fn fwhm(&self) -> f64 {
        FWHM
    }

    fn matlab_node(&self, name: String, function: &str, args: &[String]) -> CommandNode {
        let call = format!("{}('{}')", function, args.join("', '"));
        CommandNode::new(name, &self.matlab_command)
            .with_args(["-nodisplay", "-nosplash", "-batch"])
            .with_arg(call)
    }

    fn group_dirname(&self, method: &str) -> String {
        format!("l2_analysis_{}_nsub_{}", method, self.subject_list.len())
    }

    /// Cohort subjects in draw order, each listed once.
    fn distinct_subjects(&self) -> Vec<&SubjectId> {
        let mut seen = HashSet::new();
        self.subject_list
            .iter()
            .filter(|subject| seen.insert(*subject))
            .collect()
    }

    fn subject_ids(&self) -> String {
        self.subject_list
            .iter()
            .map(SubjectId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn group_workflow(&self, method: &str, function: &str) -> Workflow {
        let dataset = self.directories.dataset_dir.display().to_string();
        let output = self.directories.output_dir.display().to_string();
        let working = self.directories.working_dir.join(self.group_dirname(method));

        let mut workflow = Workflow::new(format!("l2_analysis_{}", method))
            .with_base_dir(&working);
        let working = working.display().to_string();

        for contrast in SUBJECT_CONTRASTS {
            let args = [
                method.to_string(),
                contrast.to_string(),
                self.subject_ids(),
                dataset.clone(),
                output.clone(),
                working.clone(),
            ];
            let estimate = format!("estimate_model_{}", contrast);
            let contrasts = format!("estimate_contrast_{}", contrast);
            let threshold = format!("threshold_{}", contrast);

            workflow
                .add_node(self.matlab_node(estimate.clone(), function, &args))
                .add_node(self.matlab_node(contrasts.clone(), "narps_2t6s_l2_contrasts", &args))
                .add_node(self.matlab_node(threshold.clone(), "narps_2t6s_l2_threshold", &args))
                .connect(&estimate, &contrasts)
                .connect(&contrasts, &threshold);
        }

        workflow
    }

    fn group_output(&self, method: &str, contrast: &str, file: &str) -> PathBuf {
        under(
            &self.directories.output_dir,
            &[
                self.group_dirname(method).as_str(),
                format!("_contrast_id_{}", contrast).as_str(),
                file,
            ],
        )
    }
}

impl Pipeline for PipelineTeam2T6S {
    fn team_id(&self) -> &str {
        TEAM_ID
    }

    fn directories(&self) -> &PipelineDirectories {
        &self.directories
    }

    fn directories_mut(&mut self) -> &mut PipelineDirectories {
        &mut self.directories
    }

    fn subject_list(&self) -> &[SubjectId] {
        &self.subject_list
    }

    fn set_subject_list(&mut self, subjects: Vec<SubjectId>) {
        self.subject_list = subjects;
    }

    fn subject_level_analysis(&self) -> Stage {
        let dataset = self.directories.dataset_dir.display().to_string();
        let output = self.directories.output_dir.display().to_string();
        let working = self.directories.working_dir.join("l1_analysis");

        let mut workflow = Workflow::new("l1_analysis").with_base_dir(&working);
        let working = working.display().to_string();
        let fwhm = format!("{:.1}", FWHM);

        for subject in self.distinct_subjects() {
            let args = [
                subject.to_string(),
                dataset.clone(),
                output.clone(),
                working.clone(),
                fwhm.clone(),
            ];
            let specify = format!("specify_model_{}", subject);
            let estimate = format!("estimate_model_{}", subject);
            let contrasts = format!("estimate_contrasts_{}", subject);

            workflow
                .add_node(self.matlab_node(specify.clone(), "narps_2t6s_l1_specify", &args))
                .add_node(self.matlab_node(estimate.clone(), "narps_2t6s_l1_estimate", &args))
                .add_node(self.matlab_node(contrasts.clone(), "narps_2t6s_l1_contrasts", &args))
                .connect(&specify, &estimate)
                .connect(&estimate, &contrasts);
        }

        Stage::single(workflow)
    }

    fn group_level_analysis(&self) -> Stage {
        let mut workflows: Vec<Workflow> = GROUP_METHODS
            .iter()
            .map(|method| self.group_workflow(method, "narps_2t6s_l2_one_sample"))
            .collect();
        workflows.push(self.group_workflow(GROUP_COMPARISON, "narps_2t6s_l2_two_sample"));
        Stage::many(workflows)
    }

    fn subject_level_outputs(&self) -> Vec<PathBuf> {
        let mut files: Vec<String> = Vec::with_capacity(2 * SUBJECT_CONTRASTS.len() + 1);
        files.extend(SUBJECT_CONTRASTS.iter().map(|c| format!("con_{}.nii", c)));
        files.push("SPM.mat".to_string());
        files.extend(SUBJECT_CONTRASTS.iter().map(|c| format!("spmT_{}.nii", c)));

        self.subject_list
            .iter()
            .flat_map(|subject| {
                let subject_dir = format!("_subject_id_{}", subject);
                files.iter().map(move |file| {
                    under(
                        &self.directories.output_dir,
                        &["l1_analysis", subject_dir.as_str(), file.as_str()],
                    )
                })
            })
            .collect()
    }

    fn group_level_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        for method in GROUP_METHODS {
            for contrast in SUBJECT_CONTRASTS {
                for file in ONE_SAMPLE_FILES {
                    outputs.push(self.group_output(method, contrast, file));
                }
            }
        }
        for contrast in SUBJECT_CONTRASTS {
            for file in TWO_SAMPLE_FILES {
                outputs.push(self.group_output(GROUP_COMPARISON, contrast, file));
            }
        }
        outputs
    }

    fn hypotheses_outputs(&self) -> Vec<PathBuf> {
        // (method, contrast, thresholded map, unthresholded map) per hypothesis
        let hypotheses = [
            ("equalIndifference", "0002", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
            ("equalRange", "0002", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
            ("equalIndifference", "0002", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
            ("equalRange", "0002", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
            ("equalIndifference", "0003", "_threshold1/spmT_0002_thr.nii", "spmT_0001.nii"),
            ("equalRange", "0003", "_threshold1/spmT_0002_thr.nii", "spmT_0001.nii"),
            ("equalIndifference", "0003", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
            ("equalRange", "0003", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
            (GROUP_COMPARISON, "0003", "_threshold0/spmT_0001_thr.nii", "spmT_0001.nii"),
        ];

        hypotheses
            .iter()
            .flat_map(|(method, contrast, thresholded, unthresholded)| {
                [
                    self.group_output(method, contrast, thresholded),
                    self.group_output(method, contrast, unthresholded),
                ]
            })
            .collect()
    }
}
