use super::*;
use crate::core::tsv::load_participants;

use std::fs;
use std::path::Path;
use tempfile::{TempDir, tempdir};

/*
 * End-to-end tests across the core modules: open a dataset through the
 * repository, select subjects with a filter, store the filter as a preset,
 * export the selection and read the exported tree back as a dataset.
 */

fn touch(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/* 01: anat+func, age 25. 02: anat, age 30. 03: sessions pre/post, age 40. */
fn create_source_dataset() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    touch(
        &root.join("dataset_description.json"),
        r#"{"Name": "Workflow", "BIDSVersion": "1.8.0"}"#,
    );
    touch(&root.join("README"), "readme");
    touch(
        &root.join("participants.tsv"),
        "participant_id\tage\tgroup\nsub-01\t25\tcontrol\nsub-02\t30\tpatient\nsub-03\t40\tpatient\n",
    );
    touch(&root.join("sub-01/anat/sub-01_T1w.nii.gz"), "t1-01");
    touch(
        &root.join("sub-01/func/sub-01_task-rest_bold.nii.gz"),
        "bold-01",
    );
    touch(
        &root.join("sub-01/func/sub-01_task-rest_bold.json"),
        r#"{"RepetitionTime": 2.0}"#,
    );
    touch(&root.join("sub-02/anat/sub-02_T1w.nii.gz"), "t1-02");
    touch(
        &root.join("sub-02/anat/sub-02_T1w.json"),
        r#"{"MagneticFieldStrength": 3}"#,
    );
    for ses in ["pre", "post"] {
        touch(
            &root.join(format!("sub-03/ses-{ses}/anat/sub-03_ses-{ses}_T1w.nii.gz")),
            "t1-03",
        );
    }
    touch(
        &root.join("derivatives/fmriprep/dataset_description.json"),
        r#"{"Name": "fMRIPrep"}"#,
    );
    touch(
        &root.join("derivatives/fmriprep/sub-02/anat/sub-02_desc-preproc_T1w.nii.gz"),
        "prep-02",
    );
    dir
}

#[test]
fn test_load_filter_preset_export_and_reload() {
    // Arrange
    let source = create_source_dataset();
    let presets_dir = tempdir().unwrap();
    let out_parent = tempdir().unwrap();
    let output = out_parent.path().join("subset");

    let mut repo = DatasetRepository::new(source.path(), &BidsConfig::default());
    let mut messages = Vec::new();
    {
        let mut on_progress = |_: usize, _: usize, message: &str| {
            messages.push(message.to_string());
            ProgressAction::Continue
        };
        repo.load(&mut ProgressReporter::new(&mut on_progress))
            .unwrap();
    }
    assert!(messages.iter().any(|m| m == "Loading subject: 03"));

    // Act: select patients older than 26 with an anatomical scan
    let expression = FilterExpression::and(vec![
        Condition::participant("age", CompareOperator::GreaterThan, "26").into(),
        Condition::modality("anat").into(),
        FilterExpression::not(vec![
            Condition::participant("group", CompareOperator::Equals, "control").into(),
        ]),
    ]);
    let selected = repo.query(&expression).unwrap();
    assert_eq!(selected.subject_ids(), vec!["02", "03"]);

    // Act: the filter survives a round trip through the preset store
    let presets = CorePresetManager::with_directory(presets_dir.path());
    let preset = FilterPreset::from_filter(expression.clone());
    assert_eq!(preset.mode, FilterMode::Advanced);
    presets.save_preset("older patients", &preset).unwrap();
    assert_eq!(presets.list_presets().unwrap(), vec!["olderpatients"]);
    let restored = presets.load_preset("older patients").unwrap();
    assert_eq!(restored.filter, expression);

    // Act: export the matching subjects, pre sessions only, with the derivative
    let dataset = repo.dataset().unwrap();
    let selection = SelectedEntities::new()
        .with_entity("sub", selected.subject_ids())
        .with_entity("ses", ["pre"])
        .with_pipelines(["fmriprep"]);
    let stats = calculate_export_stats(dataset, &selection);
    let config = BidsConfig {
        verify_exports: true,
        ..Default::default()
    };
    let request = ExportRequest::new(dataset, selection, &output, &config);
    let report = export_dataset(&request, &mut ProgressReporter::silent()).unwrap();

    // Assert
    assert_eq!(stats.file_count, 4);
    assert_eq!(report.files_copied, 4);
    assert!(report.failed_files.is_empty());
    assert!(report.verification_failures.is_empty());
    assert_eq!(report.participants_written, 2);
    assert_eq!(report.metadata_files_copied, 3);
    assert!(output.join("sub-02/anat/sub-02_T1w.json").is_file());
    assert!(!output.join("sub-03/ses-post").exists());
    assert!(!output.join("sub-01").exists());

    let participants = load_participants(&output.join("participants.tsv"));
    assert_eq!(
        participants.keys().cloned().collect::<Vec<_>>(),
        vec!["02", "03"]
    );

    let exported = CoreDatasetLoader::new()
        .load(&output, &mut ProgressReporter::silent())
        .unwrap();
    assert_eq!(exported.name(), Some("Workflow"));
    assert_eq!(exported.subject_ids(), vec!["02", "03"]);
    let sub03 = exported.get_subject("03").unwrap();
    assert_eq!(sub03.session_ids().collect::<Vec<_>>(), vec!["pre"]);
    let sub02 = exported.get_subject("02").unwrap();
    assert!(sub02.get_derivative("fmriprep").is_some());
    assert_eq!(sub02.metadata.get("group").map(String::as_str), Some("patient"));
}

#[test]
fn test_lazy_repository_matches_eager_results_once_loaded() {
    // Arrange
    let source = create_source_dataset();
    let config = BidsConfig {
        lazy_loading: true,
        ..Default::default()
    };
    let mut lazy = DatasetRepository::new(source.path(), &config);
    let mut eager = DatasetRepository::new(source.path(), &BidsConfig::default());
    let expression = FilterExpression::from(Condition::entity("task", CompareOperator::Equals, "rest"));

    // Act
    lazy.load(&mut ProgressReporter::silent()).unwrap();
    eager.load(&mut ProgressReporter::silent()).unwrap();
    let before = lazy.query(&expression).unwrap().subject_ids();
    lazy.load_all_subjects(&mut ProgressReporter::silent())
        .unwrap();
    let after = lazy.query(&expression).unwrap().subject_ids();

    // Assert
    assert!(before.is_empty());
    assert_eq!(after, vec!["01"]);
    assert_eq!(after, eager.query(&expression).unwrap().subject_ids());
    assert_eq!(lazy.summary().unwrap(), eager.summary().unwrap());
}

#[test]
fn test_tree_edits_feed_back_into_queries() {
    // Arrange
    let source = create_source_dataset();
    let mut repo = DatasetRepository::new(source.path(), &BidsConfig::default());
    repo.load(&mut ProgressReporter::silent()).unwrap();
    let mut tree = FilterTree::new();
    let group = tree.add_group(None, LogicalOperator::Or).unwrap();
    tree.add_condition(Some(group), Condition::subject_id("01"))
        .unwrap();
    let second = tree
        .add_condition(Some(group), Condition::subject_id("02"))
        .unwrap();

    // Act
    let first_query = repo.query(&tree.to_expression()).unwrap().subject_ids();
    tree.replace_condition(second, Condition::subject_id("03"))
        .unwrap();
    let second_query = repo.query(&tree.to_expression()).unwrap().subject_ids();

    // Assert
    assert_eq!(first_query, vec!["01", "02"]);
    assert_eq!(second_query, vec!["01", "03"]);
    assert!(!tree.to_expression().is_simple());
}

#[test]
fn test_export_with_no_match_leaves_nothing_behind() {
    let source = create_source_dataset();
    let dataset = CoreDatasetLoader::new()
        .load(source.path(), &mut ProgressReporter::silent())
        .unwrap();
    let out_parent = tempdir().unwrap();
    let output = out_parent.path().join("empty");
    let request = ExportRequest {
        source_dataset: &dataset,
        selected_entities: SelectedEntities::new().with_entity("sub", ["99"]),
        output_path: output.clone(),
        verify: false,
    };

    let result = export_dataset(&request, &mut ProgressReporter::silent());

    assert!(matches!(result, Err(ExportError::NoFilesMatched)));
    assert!(!output.exists());
}
