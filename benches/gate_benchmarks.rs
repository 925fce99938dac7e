use authgate::auth::static_tokens::StaticTokenAuthenticator;
use authgate::config::{FeatureConfig, GateConfig, StaticAuthConfig, StaticTokenConfig};
use authgate::flags::FeatureState;
use authgate::gate::AuthGate;
use authgate::sidecar::{HeaderSidecar, SideHeaders};
use axum::http::{request::Parts, Request, Response};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

fn static_gate(num_tokens: usize, security_enabled: bool) -> AuthGate {
    let mut success_headers = BTreeMap::new();
    success_headers.insert("X-Auth-Challenge".to_string(), "none".to_string());

    let config = StaticAuthConfig {
        tokens: (0..num_tokens)
            .map(|i| StaticTokenConfig {
                token: format!("token-{}", i),
                username: format!("user-{}", i),
                roles: vec![],
            })
            .collect(),
        login_url: Some("/login".to_string()),
        challenge: "Bearer realm=\"authgate\"".to_string(),
        success_headers,
    };

    let authenticator =
        StaticTokenAuthenticator::new(&config).expect("Failed to create authenticator");
    let features = FeatureState::new(&FeatureConfig {
        available: true,
        security_enabled,
    });
    AuthGate::new(Arc::new(features), Arc::new(authenticator))
}

fn request(token: &str) -> Parts {
    Request::builder()
        .uri("/api/users?page=2")
        .header("Authorization", format!("Bearer {}", token))
        .body(())
        .expect("Failed to build request")
        .into_parts()
        .0
}

fn benchmark_decide_and_finalize(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let gate = static_gate(100, true);
    let valid = request("token-50");
    let invalid = request("unknown");

    c.bench_function("decide_valid_token", |b| {
        b.to_async(&runtime).iter(|| async {
            let (decision, finalizer) = gate.decide(&valid).await;
            black_box(decision);
            black_box(finalizer.finalize(Response::new(())))
        })
    });

    c.bench_function("decide_invalid_token", |b| {
        b.to_async(&runtime).iter(|| async {
            let (decision, finalizer) = gate.decide(&invalid).await;
            black_box(decision);
            black_box(finalizer.finalize(Response::new(())))
        })
    });

    let bypass = static_gate(100, false);
    c.bench_function("decide_security_disabled", |b| {
        b.to_async(&runtime).iter(|| async {
            let (decision, finalizer) = bypass.decide(&valid).await;
            black_box(decision);
            black_box(finalizer.finalize(Response::new(())))
        })
    });
}

fn benchmark_sidecar_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("sidecar_scale");

    for in_flight in [10, 100, 1000, 10000].iter() {
        let sidecar = HeaderSidecar::new();
        let headers = SideHeaders::from_pairs([("X-Auth-Challenge", "none")])
            .expect("Failed to build headers");
        let open: Vec<_> = (0..*in_flight)
            .map(|_| {
                let ctx = sidecar.open();
                ctx.record_headers(headers.clone());
                ctx
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(in_flight),
            in_flight,
            |b, &_n| {
                b.iter(|| {
                    let ctx = sidecar.open();
                    ctx.record_headers(headers.clone());
                    black_box(ctx.take_headers())
                })
            },
        );

        drop(open);
    }
    group.finish();
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080

upstream:
  url: "http://localhost:3000"

auth:
  provider: static
  login_url: "/login"
  tokens:
    - token: "alice-token"
      username: "alice"
      roles: ["admin"]
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(GateConfig::from_yaml(yaml)))
    });
}

criterion_group!(
    benches,
    benchmark_decide_and_finalize,
    benchmark_sidecar_scale,
    benchmark_config_parsing
);
criterion_main!(benches);
