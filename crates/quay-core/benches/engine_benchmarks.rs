use criterion::{criterion_group, criterion_main, Criterion};
use quay_core::{without_self, Engine, EngineConfig, StackRef};
use quay_runtime::MockRuntime;
use quay_schema::{normalize, EnvMap, LoadOptions, Project, Service};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn large_project(services: usize) -> Project {
    let mut project = Project::new("bench", "/stacks");
    for i in 0..services {
        project = project.with_service(Service::new(format!("svc{i:03}"), "registry/app:1.0"));
    }
    project.with_service(Service::new("quay", "ghcr.io/quay-dev/quay:1"))
}

fn write_stack(root: &Path, services: usize) -> StackRef {
    let mut definition = String::from("services:\n");
    for i in 0..services {
        let _ = write!(
            definition,
            "  svc{i:03}:\n    image: registry/app:${{TAG:-1.0}}\n    volumes:\n      - ./data/{i}:/data\n    environment:\n      INDEX: \"{i}\"\n"
        );
    }
    let dir = root.join("bench");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("compose.yaml"), definition).unwrap();
    StackRef::new("bench/compose.yaml")
}

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_100_services", |b| {
        b.iter_with_setup(|| large_project(100), |project| normalize(project).unwrap());
    });
}

fn bench_load(c: &mut Criterion) {
    let root = tempfile::tempdir().unwrap();
    let stack = write_stack(root.path(), 50);
    let engine = Engine::new(EngineConfig::new(root.path()), Arc::new(MockRuntime::new()))
        .with_load_options(LoadOptions {
            process_env: Some(EnvMap::new()),
            ..LoadOptions::default()
        });

    c.bench_function("engine_load_50_services", |b| {
        b.iter(|| engine.load(&stack).unwrap());
    });
}

fn bench_without_self(c: &mut Criterion) {
    let project = large_project(200);
    c.bench_function("without_self_expand_200", |b| {
        b.iter(|| without_self(&project, &[], "ghcr.io/quay-dev/quay", false));
    });
}

fn bench_update_unchanged(c: &mut Criterion) {
    c.bench_function("engine_update_unchanged_mock", |b| {
        b.iter_with_setup(
            || {
                let root = tempfile::tempdir().unwrap();
                let stack = write_stack(root.path(), 10);
                let runtime = Arc::new(MockRuntime::new());
                runtime.set_image("registry/app:1.0", "sha256:aaa");
                let engine = Engine::new(EngineConfig::new(root.path()), runtime)
                    .with_load_options(LoadOptions {
                        process_env: Some(EnvMap::new()),
                        ..LoadOptions::default()
                    });
                (root, stack, engine)
            },
            |(_root, stack, engine)| {
                engine.update(&stack, &[]).unwrap();
            },
        );
    });
}

criterion_group!(
    benches,
    bench_normalize,
    bench_load,
    bench_without_self,
    bench_update_unchanged
);
criterion_main!(benches);
