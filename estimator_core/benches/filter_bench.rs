use criterion::{black_box, criterion_group, criterion_main, Criterion};
use estimator_core::{
    DMat, DVec, EkfConfig, ExtendedKalmanFilter, Filter, ImmConfig, ImmFilter, KalmanFilter,
    KfConfig, ModelEntry, ModelType,
};
use motion_models::{
    ca_noise, ca_observation, ca_transition, ct2d_noise, cv_noise, cv_observation,
    cv_transition, position_noise, CoordinatedTurn2D, KinematicSwitch,
};

const DT: f64 = 1.0;

fn measurements(n: usize) -> Vec<DVec> {
    (0..n)
        .map(|k| {
            let t = k as f64 * DT;
            DVec::from_vec(vec![100.0 * t, 2000.0 * (t / 50.0).sin()])
        })
        .collect()
}

fn cv_kf() -> KalmanFilter {
    KalmanFilter::new(KfConfig::new(
        cv_transition(2, DT),
        cv_observation(2),
        cv_noise(2, DT, 1.0),
        position_noise(&[10.0, 10.0]),
    ))
    .unwrap()
}

fn ct_ekf(config: EkfConfig) -> Box<dyn Filter + Send> {
    Box::new(
        ExtendedKalmanFilter::additive(
            CoordinatedTurn2D::new(2, DT).unwrap(),
            ct2d_noise(2, DT, 1.0, 0.5),
            position_noise(&[10.0, 10.0]),
            5,
            config,
        )
        .unwrap(),
    )
}

fn run(filter: &mut dyn Filter, x0: &DVec, p0: &DMat, zs: &[DVec]) {
    filter.init(x0, p0).unwrap();
    for z in zs {
        black_box(filter.step(z, None).unwrap());
    }
}

fn bench_filters(c: &mut Criterion) {
    let zs = measurements(200);
    let x0 = DVec::from_vec(vec![0.0, 100.0, 0.0, 0.0]);
    let p0 = DMat::identity(4, 4) * 100.0;
    let x0_ct = DVec::from_vec(vec![0.0, 100.0, 0.0, 0.0, 0.0]);
    let p0_ct = DMat::identity(5, 5) * 100.0;

    let mut group = c.benchmark_group("filters");

    group.bench_function("kf_cv_200_steps", |b| {
        b.iter(|| run(&mut cv_kf(), &x0, &p0, &zs));
    });

    for (name, config) in [
        ("ekf_ct_200_steps", EkfConfig::default()),
        ("ekf_ct_second_order_200_steps", EkfConfig { order: 2, ..EkfConfig::default() }),
        ("iekf_ct_3_iterations_200_steps", EkfConfig { iterations: 3, ..EkfConfig::default() }),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| run(ct_ekf(config.clone()).as_mut(), &x0_ct, &p0_ct, &zs));
        });
    }

    group.bench_function("imm_cv_ca_ct_200_steps", |b| {
        b.iter(|| {
            let mut imm = ImmFilter::new(KinematicSwitch::default(), ImmConfig::default());
            let ca = KalmanFilter::new(KfConfig::new(
                ca_transition(2, DT),
                ca_observation(2),
                ca_noise(2, DT, 0.5),
                position_noise(&[10.0, 10.0]),
            ))
            .unwrap();
            imm.add_models(
                vec![
                    ModelEntry::new(Box::new(cv_kf()), ModelType::Cv),
                    ModelEntry::new(Box::new(ca), ModelType::Ca),
                    ModelEntry::new(ct_ekf(EkfConfig::default()), ModelType::Ct),
                ],
                None,
                None,
            )
            .unwrap();
            run(&mut imm, &x0, &p0, &zs);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_filters);
criterion_main!(benches);
