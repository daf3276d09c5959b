use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ui_trail::{Action, ActionType, CaptureArbiter, CaptureContext};

fn benchmark_arbiter(c: &mut Criterion) {
    let actions = [
        Action::new(ActionType::Scroll, "Scroll down"),
        Action::new(ActionType::Wait, "Wait for load"),
        Action::new(ActionType::Click, "Click on 'Next'"),
        Action::new(ActionType::Other, "Hover"),
    ];
    let urls: Vec<String> = (0..50).map(|i| format!("https://app.test/page/{}", i)).collect();

    c.bench_function("arbiter_decide", |b| {
        let mut arbiter = CaptureArbiter::new();
        arbiter.record(&urls[0]);
        b.iter(|| {
            for (i, action) in actions.iter().enumerate() {
                let ctx = CaptureContext {
                    is_initial: false,
                    is_final: false,
                    url: &urls[i % 2],
                    action: Some(action),
                };
                black_box(arbiter.decide(black_box(&ctx)));
            }
        })
    });

    c.bench_function("arbiter_run_of_200_iterations", |b| {
        b.iter(|| {
            let mut arbiter = CaptureArbiter::new();
            for i in 0..200 {
                let url = &urls[(i / 7) % urls.len()];
                let ctx = CaptureContext {
                    is_initial: i == 0,
                    is_final: i == 199,
                    url,
                    action: Some(&actions[i % actions.len()]),
                };
                if arbiter.decide(&ctx).should_capture() {
                    black_box(arbiter.record(url));
                }
            }
            black_box(arbiter.recorded())
        })
    });
}

criterion_group!(benches, benchmark_arbiter);
criterion_main!(benches);
