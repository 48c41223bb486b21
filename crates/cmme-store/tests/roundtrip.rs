//! Instruction files read back to the value that was written.

use cmme_core::{
    Distribution, DrexBuilder, EscapeMethod, InputSequence, PpmDecayBuilder, PpmSimpleBuilder,
    Prior, UnprocessedPrior, normalize, run_drex, run_ppm,
};
use cmme_store::{
    mint_path, read_drex_instructions, read_drex_results, read_ppm_instructions, read_ppm_results,
    write_drex_instructions, write_drex_results, write_ppm_instructions, write_ppm_results,
};
use proptest::prelude::*;

fn sequence(trials: Vec<Vec<u8>>) -> InputSequence {
    InputSequence::from_trials(
        trials
            .into_iter()
            .map(|t| t.into_iter().map(|v| vec![f64::from(v)]).collect())
            .collect(),
    )
    .unwrap()
}

fn escape() -> impl Strategy<Value = EscapeMethod> {
    prop_oneof![
        Just(EscapeMethod::A),
        Just(EscapeMethod::B),
        Just(EscapeMethod::C),
        Just(EscapeMethod::D),
        Just(EscapeMethod::AX),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn ppm_simple_instructions(
        trials in prop::collection::vec(prop::collection::vec(0u8..6, 1..12), 1..4),
        order_bound in 0usize..12,
        escape in escape(),
        flags in any::<(bool, bool, bool)>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut b = PpmSimpleBuilder::new(sequence(trials)).order_bound(order_bound).escape(escape);
        (b.shortest_deterministic, b.exclusion, b.update_exclusion) = flags;
        let inst = b.to_instructions_file().unwrap();
        let path = mint_path(dir.path(), "ppm-inst", "sqlite").unwrap();
        write_ppm_instructions(&path, &inst).unwrap();
        prop_assert_eq!(read_ppm_instructions(&path).unwrap(), inst);
    }

    #[test]
    fn ppm_decay_instructions(
        values in prop::collection::vec(0u8..5, 1..20),
        stm_weight in 0.0f64..1.0,
        stm_duration in 0.0f64..100.0,
        noise in 0.0f64..2.0,
        seed in any::<u64>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut b = PpmDecayBuilder::new(sequence(vec![values]));
        b.stm_weight = stm_weight;
        b.ltm_weight = stm_weight / 2.0;
        b.stm_duration = stm_duration;
        b.noise = noise;
        b.seed = seed;
        let inst = b.to_instructions_file().unwrap();
        let path = mint_path(dir.path(), "ppm-inst", "sqlite").unwrap();
        write_ppm_instructions(&path, &inst).unwrap();
        prop_assert_eq!(read_ppm_instructions(&path).unwrap(), inst);
    }

    #[test]
    fn drex_instructions(
        prior_values in prop::collection::vec(-50.0f64..50.0, 3..20),
        input in prop::collection::vec(-50.0f64..50.0, 1..20),
        hazard in 0.0f64..1.0,
        threshold in 0.0f64..1.0,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let prior = Prior::Unprocessed(
            UnprocessedPrior::new(
                Distribution::Gaussian,
                normalize(prior_values).unwrap(),
                None,
                None,
                None,
            )
            .unwrap(),
        );
        let inst = DrexBuilder::new(prior, normalize(input).unwrap())
            .hazard(cmme_core::Hazard::Constant(hazard))
            .threshold(threshold)
            .to_instructions_file()
            .unwrap();
        let path = mint_path(dir.path(), "drex-inst", "json").unwrap();
        write_drex_instructions(&path, &inst).unwrap();
        prop_assert_eq!(read_drex_instructions(&path).unwrap(), inst);
    }
}

#[test]
fn result_files_are_stable_under_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let seq = normalize(vec![1.0, 2.0, 1.0, 3.0, 1.0, 2.0]).unwrap();

    let ppm = run_ppm(&PpmSimpleBuilder::new(seq.clone()).to_instructions_file().unwrap());
    let meta = mint_path(dir.path(), "ppm-meta", "sqlite").unwrap();
    let data = mint_path(dir.path(), "ppm-data", "sqlite").unwrap();
    write_ppm_results(&meta, &data, &ppm).unwrap();
    let once = read_ppm_results(&meta).unwrap();
    let meta2 = mint_path(dir.path(), "ppm-meta", "sqlite").unwrap();
    write_ppm_results(&meta2, &data, &once).unwrap();
    assert_eq!(read_ppm_results(&meta2).unwrap(), once);

    let prior = Prior::Unprocessed(
        UnprocessedPrior::new(Distribution::Poisson, seq.clone(), Some(2), None, None).unwrap(),
    );
    let drex = run_drex(&DrexBuilder::new(prior, seq).to_instructions_file().unwrap()).unwrap();
    let path = mint_path(dir.path(), "drex-res", "json").unwrap();
    write_drex_results(&path, &drex).unwrap();
    let once = read_drex_results(&path).unwrap();
    write_drex_results(&path, &once).unwrap();
    assert_eq!(read_drex_results(&path).unwrap(), once);
}
