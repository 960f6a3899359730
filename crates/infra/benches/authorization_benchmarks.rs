use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use sitegate_auth::{
    AuthorizationEngine, AuthorizationSettings, ElementCheck, FailureMode, PrivilegeLevel,
    RoleScope, SecurityCollectionsBuilder, User,
};
use sitegate_core::{SystemClock, UserId};
use sitegate_infra::InMemoryMembershipStore;
use std::sync::Arc;

/// A user bound to `sites` sites with `roles_per_site` roles each, half of
/// them expiring tomorrow.
fn seeded_store(sites: usize, roles_per_site: usize) -> (Arc<InMemoryMembershipStore>, UserId) {
    let store = Arc::new(InMemoryMembershipStore::new());
    let user = UserId::new(1_000_000);
    let tomorrow = Utc::now() + Duration::days(1);

    for s in 0..sites {
        let site = store.add_site(&format!("site{s}"));
        store.assign_site(user, site);
        for r in 0..roles_per_site {
            let role = store.add_role(&format!("role{r}"), Some(site));
            let valid_to = (r % 2 == 0).then_some(tomorrow);
            store.assign_role(user, role, valid_to);
            store.grant_ui_element(role, "cms.content", &format!("element{r}"));
            store.grant_permission("cms.content", "read", role);
        }
    }
    (store, user)
}

fn bench_snapshot_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_build");

    for sites in [1usize, 10, 50] {
        let (store, user) = seeded_store(sites, 20);
        let builder = SecurityCollectionsBuilder::new(
            Arc::clone(&store),
            Arc::new(AuthorizationSettings::default()),
        );
        group.bench_with_input(BenchmarkId::from_parameter(sites), &sites, |b, _| {
            b.iter(|| black_box(builder.build_for(user).unwrap()));
        });
    }

    group.finish();
}

fn bench_cached_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_checks");
    let (store, user_id) = seeded_store(10, 20);
    let engine = AuthorizationEngine::new(
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::new(AuthorizationSettings::default()),
        Arc::new(SystemClock),
    );
    let user = User::loaded(user_id, "bench", PrivilegeLevel::None);
    engine.collections(&user).unwrap();

    group.bench_function("is_in_role_hit", |b| {
        b.iter(|| {
            black_box(
                engine
                    .is_in_role(&user, "role7", Some("site3"), RoleScope::default())
                    .unwrap(),
            )
        });
    });

    group.bench_function("is_in_role_miss", |b| {
        b.iter(|| {
            black_box(
                engine
                    .is_in_role(&user, "nobody", Some("site3"), RoleScope::default())
                    .unwrap(),
            )
        });
    });

    group.bench_function("resource_permission", |b| {
        b.iter(|| {
            black_box(
                engine
                    .is_authorized_per_resource(
                        &user,
                        "cms.content",
                        "read",
                        Some("site9"),
                        FailureMode::ReturnFalse,
                    )
                    .unwrap(),
            )
        });
    });

    group.bench_function("ui_elements", |b| {
        b.iter(|| {
            black_box(
                engine
                    .is_authorized_per_ui_element(
                        &user,
                        "cms.content",
                        &["element1", "element2", "element3"],
                        Some("site5"),
                        ElementCheck::default(),
                        FailureMode::ReturnFalse,
                    )
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_snapshot_build, bench_cached_checks);
criterion_main!(benches);
