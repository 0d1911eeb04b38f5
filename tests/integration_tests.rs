// End-to-end tests: normalization, cell-cycle scoring, regression, pseudobulk
// aggregation and differential expression chained the way an analysis runs.

#[cfg(test)]
mod integration_tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use single_cellstats::aggregate::{AggregateParams, aggregate};
    use single_cellstats::data::{CellMetadata, Column, ExpressionMatrix, ValueScale};
    use single_cellstats::enrichment::{
        CellCycleParams, SignatureParams, score_cell_cycle, tirosh_g2m_genes, tirosh_s_genes,
    };
    use single_cellstats::fields;
    use single_cellstats::preprocessing::{NormalizeParams, RegressParams, normalize, regress_out};
    use single_cellstats::testing::{
        DeParams, JoinPolicy, TestMethod, differential_expression, join_results,
    };

    const N_CELLS: usize = 24;
    const S_MARKERS: [&str; 4] = ["MCM5", "PCNA", "TYMS", "FEN1"];
    const G2M_MARKERS: [&str; 4] = ["CDK1", "TOP2A", "MKI67", "BIRC5"];

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn gene_names() -> Vec<String> {
        let mut genes: Vec<String> = (0..40).map(|g| format!("BG{:02}", g)).collect();
        genes.extend(S_MARKERS.iter().map(|g| g.to_string()));
        genes.extend(G2M_MARKERS.iter().map(|g| g.to_string()));
        genes.push("MARKER".to_string());
        genes.push("FLAT".to_string());
        genes
    }

    /// Cells 0-11 are ctrl, 12-23 stim; donors cycle d1, d2, d3. Every fourth
    /// cell is in S phase, the next one in G2/M. MARKER is induced by stim.
    fn raw_counts() -> ExpressionMatrix {
        let genes = gene_names();
        let values = Array2::from_shape_fn((genes.len(), N_CELLS), |(g, c)| {
            let stim = c >= 12;
            match g {
                0..40 => 5.0 + ((g * 3 + c * 7) % 11) as f64,
                40..44 => {
                    if c % 4 == 0 { 30.0 } else { 2.0 }
                }
                44..48 => {
                    if c % 4 == 1 { 30.0 } else { 2.0 }
                }
                48 => {
                    if stim { 40.0 + (c % 5) as f64 } else { 2.0 + (c % 3) as f64 }
                }
                _ => 10.0,
            }
        });
        ExpressionMatrix::new(
            values,
            genes,
            (0..N_CELLS).map(|c| format!("cell{:02}", c)).collect(),
            ValueScale::RawCounts,
        )
        .unwrap()
    }

    fn metadata() -> CellMetadata {
        let cells = (0..N_CELLS).map(|c| format!("cell{:02}", c)).collect();
        let treatment = (0..N_CELLS)
            .map(|c| if c < 12 { "ctrl" } else { "stim" }.to_string())
            .collect();
        let donor = (0..N_CELLS).map(|c| format!("d{}", c % 3 + 1)).collect();
        CellMetadata::new(cells)
            .unwrap()
            .with_field("treatment", Column::Categorical(treatment))
            .unwrap()
            .with_field("donor", Column::Categorical(donor))
            .unwrap()
    }

    fn cycle_params(seed: u64) -> CellCycleParams {
        CellCycleParams::default().with_signature(SignatureParams::default().with_bins(4).with_seed(seed))
    }

    #[test]
    fn test_full_pipeline() {
        init_logger();
        let counts = raw_counts();
        let md = metadata();

        let norm = normalize(&counts, &NormalizeParams::default()).unwrap();
        assert_eq!(norm.scale(), ValueScale::LogNormalized);

        let cycle = score_cell_cycle(&norm, &tirosh_s_genes(), &tirosh_g2m_genes(), &cycle_params(42)).unwrap();
        assert_eq!(cycle.signature.n_missing(), 43 - 4 + 54 - 4);
        let md = cycle.metadata_update().apply(&md).unwrap();
        let phases = md.categorical(fields::PHASE).unwrap();
        assert!(phases.iter().all(|p| p == "S" || p == "G2M" || p == "G1"));

        let regressed = regress_out(
            &norm,
            &md,
            &[fields::S_SCORE, fields::G2M_SCORE],
            &RegressParams::default(),
        )
        .unwrap();
        assert_eq!(regressed.used_covariates.len(), 2);
        for g in 0..regressed.matrix.n_genes() {
            let row = regressed.matrix.row(g);
            if row.iter().all(|&v| v == 0.0) {
                continue;
            }
            let mean = row.sum() / N_CELLS as f64;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (N_CELLS - 1) as f64;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);
        }

        // Single-cell markers of stimulation.
        let params = DeParams::new("treatment", &["stim"]).with_ident_2(&["ctrl"]);
        let cell_de = differential_expression(&norm, &md, &params).unwrap();
        assert_eq!(cell_de.n_tested, counts.n_genes());
        let marker = cell_de.get("MARKER").unwrap();
        assert!(marker.avg_log2fc > 0.0);
        assert!(marker.p_val_adj < 0.05);
        assert_eq!(cell_de.rows[0].gene, "MARKER");

        // Pseudobulk: one sample per (treatment, donor).
        let bulk = aggregate(&counts, &md, &["treatment", "donor"], &AggregateParams::default()).unwrap();
        assert_eq!(bulk.matrix.n_columns(), 6);
        assert!(bulk.metadata.numeric(fields::N_CELLS).unwrap().iter().all(|&n| n == 4.0));
        for g in 0..counts.n_genes() {
            assert_eq!(bulk.matrix.row(g).sum(), counts.row(g).sum());
        }

        let bulk_params = params.clone().with_method(TestMethod::NegativeBinomial);
        let bulk_de = differential_expression(&bulk.matrix, &bulk.metadata, &bulk_params).unwrap();
        assert_eq!(bulk_de.n_group1, 3);
        assert_eq!(bulk_de.n_group2, 3);
        let bulk_marker = bulk_de.get("MARKER").unwrap();
        assert!(bulk_marker.avg_log2fc > 0.0);
        assert!(bulk_marker.p_val_adj < 0.05);

        let joined = join_results(&cell_de, &bulk_de, JoinPolicy::InnerJoinDrop).unwrap();
        let summary = joined.summary(0.05);
        assert_eq!(summary.n_shared, counts.n_genes());
        assert!(joined.dropped_left.is_empty() && joined.dropped_right.is_empty());
        assert!(summary.significant_both >= 1);
    }

    #[test]
    fn test_seeded_scoring_is_reproducible() {
        let norm = normalize(&raw_counts(), &NormalizeParams::default()).unwrap();
        let a = score_cell_cycle(&norm, &tirosh_s_genes(), &tirosh_g2m_genes(), &cycle_params(7)).unwrap();
        let b = score_cell_cycle(&norm, &tirosh_s_genes(), &tirosh_g2m_genes(), &cycle_params(7)).unwrap();
        assert_eq!(a.s_score, b.s_score);
        assert_eq!(a.g2m_score, b.g2m_score);
        assert_eq!(a.phase, b.phase);
    }

    #[test]
    fn test_phase_labels_follow_scores() {
        let norm = normalize(&raw_counts(), &NormalizeParams::default()).unwrap();
        for seed in 0..5 {
            let cycle = score_cell_cycle(&norm, &tirosh_s_genes(), &tirosh_g2m_genes(), &cycle_params(seed)).unwrap();
            for (cell, phase) in cycle.phase.iter().enumerate() {
                let (s, g2m) = (cycle.s_score[cell], cycle.g2m_score[cell]);
                match phase.as_str() {
                    "S" => assert!(s > 0.0 && s >= g2m),
                    "G2M" => assert!(g2m > 0.0 && g2m > s),
                    "G1" => assert!(s <= 0.0 && g2m <= 0.0),
                    other => panic!("unexpected phase {}", other),
                }
            }
        }
    }

    #[test]
    fn test_rest_equals_explicit_complement() {
        let norm = normalize(&raw_counts(), &NormalizeParams::default()).unwrap();
        let md = metadata();
        let rest = differential_expression(&norm, &md, &DeParams::new("donor", &["d1"])).unwrap();
        let explicit = differential_expression(
            &norm,
            &md,
            &DeParams::new("donor", &["d1"]).with_ident_2(&["d2", "d3"]),
        )
        .unwrap();
        assert_eq!(rest.n_tested, explicit.n_tested);
        assert_eq!(rest.genes(), explicit.genes());
        assert_eq!(
            rest.column(fields::P_VAL).unwrap(),
            explicit.column(fields::P_VAL).unwrap()
        );
    }

    #[test]
    fn test_only_pos_keeps_exactly_positive_rows() {
        let norm = normalize(&raw_counts(), &NormalizeParams::default()).unwrap();
        let md = metadata();
        let params = DeParams::new("treatment", &["stim"]);
        let all = differential_expression(&norm, &md, &params).unwrap();
        let pos = differential_expression(&norm, &md, &params.clone().only_pos(true)).unwrap();

        let expected: Vec<&str> = all
            .rows
            .iter()
            .filter(|r| r.avg_log2fc > 0.0)
            .map(|r| r.gene.as_str())
            .collect();
        assert_eq!(pos.genes(), expected);
        assert!(pos.len() < all.len());
    }

    #[test]
    fn test_four_cell_example() {
        let m = ExpressionMatrix::new(
            array![[10.0, 10.0, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0]],
            vec!["A".into(), "B".into()],
            vec!["c1".into(), "c2".into(), "c3".into(), "c4".into()],
            ValueScale::LogNormalized,
        )
        .unwrap();
        let md = CellMetadata::new(m.columns().to_vec())
            .unwrap()
            .with_field(
                "group",
                Column::Categorical(vec!["g1".into(), "g1".into(), "g2".into(), "g2".into()]),
            )
            .unwrap();
        let table = differential_expression(&m, &md, &DeParams::new("group", &["g1"])).unwrap();
        let a = table.get("A").unwrap();
        let b = table.get("B").unwrap();

        // Two cells per side cap the rank test's resolution; A is still the
        // strongest possible separation.
        assert!(a.avg_log2fc > 0.0);
        assert!(a.p_val < 0.25);
        assert!(a.p_val < b.p_val);
        assert_eq!(b.p_val, 1.0);
        assert_abs_diff_eq!(b.avg_log2fc, 0.0, epsilon = 1e-12);
        assert_eq!(table.rows[0].gene, "A");
    }

    #[test]
    fn test_pseudobulk_rejects_single_replicate() {
        let counts = raw_counts();
        let md = metadata();
        let bulk = aggregate(&counts, &md, &["treatment"], &AggregateParams::default()).unwrap();
        let params = DeParams::new("treatment", &["stim"]).with_method(TestMethod::NegativeBinomial);
        let err = differential_expression(&bulk.matrix, &bulk.metadata, &params).unwrap_err();
        assert!(matches!(
            err,
            single_cellstats::Error::Backend {
                source: single_cellstats::BackendError::InsufficientReplicates { .. },
                ..
            }
        ));
    }
}
