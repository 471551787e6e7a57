use std::path::Path;

use coalsim::*;
use tempfile::tempdir;

const ISLAND_MODEL: &str = "
time_units: generations
demes:
  - name: anc
    epochs:
      - start_size: 1000
        end_time: 200
  - name: A
    ancestors: [anc]
    epochs:
      - start_size: 500
  - name: B
    ancestors: [anc]
    epochs:
      - start_size: 800
migrations:
  - demes: [A, B]
    rate: 1e-4
";

fn write_model(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("model.yaml");
    std::fs::write(&path, ISLAND_MODEL).unwrap();
    path
}

fn records(path: &Path) -> Vec<Vec<String>> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#'))
        .map(|l| l.split('\t').map(str::to_string).collect())
        .collect()
}

#[test]
fn simulate_writes_vcf() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let out = dir.path().join("sim.vcf");
    let params = Parameters {
        random_seed: Some(12),
        sequence_length: 1000,
        mutation: RateParameter::Scalar(1e-4),
        contig_id: "7".to_string(),
        ..Default::default()
    };

    let outcome = simulate(model.as_path(), &params, Some(&out)).unwrap();
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.contig_id, "7");
    assert!(summary.num_sites > 0);

    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.contains("##contig=<ID=7,length=1000>"));
    assert!(text.contains("FORMAT\tA\tB\n"));

    let rows = records(&out);
    assert_eq!(rows.len(), summary.num_sites);
    let mut last = 0;
    for row in &rows {
        assert_eq!(row[0], "7");
        let pos: u64 = row[1].parse().unwrap();
        assert!(pos >= 1 && pos <= 1000 && pos > last);
        last = pos;
        assert_eq!(row.len(), 11);
        assert!(row[9].contains('|'));
    }
}

#[test]
fn in_memory_genealogy_and_tree_sequence() {
    let dir = tempdir().unwrap();
    let model = DemographicModel::load(&write_model(dir.path())).unwrap();
    let params = Parameters {
        random_seed: Some(4),
        sequence_length: 5000,
        recombination: RateParameter::Scalar(1e-6),
        mutation: RateParameter::Scalar(1e-5),
        sampled_demes: Some(vec!["B".to_string()]),
        ..Default::default()
    };

    let outcome = simulate(model, &params, None).unwrap();
    let genealogy = outcome.genealogy().unwrap();
    assert_eq!(genealogy.samples().len(), 2);
    assert_eq!(genealogy.individual_names(), &["B".to_string()]);
    assert!(genealogy.provenance().is_some());

    let ts = genealogy.to_tree_sequence().unwrap();
    assert_eq!(ts.num_samples().as_usize(), 2);
    assert_eq!(ts.num_trees().as_usize(), genealogy.num_trees());

    let trees = dir.path().join("sim.trees");
    genealogy.dump(&trees).unwrap();
    assert!(trees.exists());
}

#[test]
fn same_seed_same_vcf() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let params = Parameters {
        random_seed: Some(99),
        sequence_length: 2000,
        mutation: RateParameter::Scalar(5e-5),
        ..Default::default()
    };
    let a = dir.path().join("a.vcf");
    let b = dir.path().join("b.vcf");
    simulate(model.as_path(), &params, Some(&a)).unwrap();
    simulate(model.as_path(), &params, Some(&b)).unwrap();
    assert_eq!(records(&a), records(&b));
}

#[test]
fn chromosome_with_rate_files() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());

    let u_path = dir.path().join("u.bedgraph");
    std::fs::write(
        &u_path,
        "track type=bedGraph\nchr2\t0\t1000\t0\nchr2\t1000\t3000\t1e-4\n",
    )
    .unwrap();
    let r_path = dir.path().join("chr2.map");
    std::fs::write(
        &r_path,
        "Chromosome\tPosition(bp)\tRate(cM/Mb)\tMap(cM)\nchr2\t0\t1.0\t0.0\nchr2\t3000\t1.0\t0.3\n",
    )
    .unwrap();

    let params = Parameters {
        random_seed: Some(8),
        sequence_length: 3000,
        recombination: RateParameter::EmpiricalFile(r_path),
        mutation: RateParameter::EmpiricalFile(u_path),
        contig_id: "chr2".to_string(),
        ..Default::default()
    };
    let out = dir.path().join("chr2.vcf.gz");
    let summary = simulate_chromosome(model.as_path(), &params, &out).unwrap();
    assert_eq!(summary.sequence_length, 3000);
    assert_eq!(summary.path, out);
    assert!(summary.num_sites > 0);
}

#[test]
fn drawn_seed_is_reported_and_replays() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let params = Parameters {
        sequence_length: 2000,
        mutation: RateParameter::Scalar(5e-5),
        ..Default::default()
    };
    let first = dir.path().join("first.vcf");
    let summary = simulate_chromosome(model.as_path(), &params, &first).unwrap();
    let seed = summary.random_seed.unwrap();
    assert_eq!(summary.contig_id, "0");

    let replay = dir.path().join("replay.vcf");
    let params = Parameters {
        random_seed: Some(seed),
        ..params
    };
    let again = simulate_chromosome(model.as_path(), &params, &replay).unwrap();
    assert_eq!(again.random_seed, Some(seed));
    assert_eq!(records(&first), records(&replay));
}

#[test]
fn chromosome_rejects_bad_map() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let r_path = dir.path().join("bad.map");
    std::fs::write(&r_path, "100 0.0\n50 0.1\n").unwrap();
    let params = Parameters {
        random_seed: Some(1),
        sequence_length: 1000,
        recombination: RateParameter::EmpiricalFile(r_path),
        ..Default::default()
    };
    let result = simulate_chromosome(model.as_path(), &params, &dir.path().join("x.vcf"));
    assert!(matches!(result, Err(SimError::MapConstruction { .. })));
}

#[test]
fn coalescence_rates_for_a_pair() {
    let dir = tempdir().unwrap();
    let model = DemographicModel::load(&write_model(dir.path())).unwrap();
    let rates = get_coalescent_rate(&model, "A", &[0.0, 100.0, 1000.0], 2).unwrap();
    assert_eq!(rates.len(), 3);
    assert!(rates.iter().all(|r| r.is_finite() && *r >= 0.0));
    assert!((rates[2] - 1.0 / 2000.0).abs() < 1e-9);
}
