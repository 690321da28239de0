//! Integration tests for the organization tree using in-memory SQLite.

use arbor_core::error::ArborError;
use arbor_core::models::audit::{AuditEventFilter, EventKind, ObjectKind};
use arbor_core::models::membership::MembershipChange;
use arbor_core::models::organization::{
    CreateOrganization, Organization, OrganizationFilter, UpdateOrganization, Visibility,
};
use arbor_core::models::role::CreateRole;
use arbor_core::models::user::{CreateUser, User};
use arbor_core::nested_set::{Interval, is_well_formed};
use arbor_core::repository::{
    EventLog, OrganizationRepository, Pagination, RoleRepository, UserRepository,
};
use arbor_db::repository::{
    SqlEventLog, SqlOrganizationRepository, SqlRoleRepository, SqlUserRepository,
};
use arbor_db::{DbConfig, DbManager};
use futures::TryStreamExt;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Helper: spin up in-memory DB and run migrations.
async fn setup() -> SqlitePool {
    let manager = DbManager::connect(&DbConfig::default()).await.unwrap();
    arbor_db::run_migrations(manager.pool()).await.unwrap();
    manager.pool().clone()
}

async fn create_user(pool: &SqlitePool, name: &str, email: &str) -> User {
    SqlUserRepository::new(pool.clone())
        .create(
            Uuid::new_v4(),
            &CreateUser {
                email: email.into(),
                name: name.into(),
            },
        )
        .await
        .unwrap()
}

fn new_org(name: &str, parent: Option<&str>, visibility: Visibility) -> CreateOrganization {
    CreateOrganization {
        name: name.into(),
        parent: parent.map(Into::into),
        visibility,
    }
}

async fn tree(repo: &SqlOrganizationRepository, root: &str) -> Vec<Organization> {
    repo.list(
        OrganizationFilter {
            roots: vec![root.into()],
            ..Default::default()
        },
        Pagination::default(),
    )
    .await
    .unwrap()
    .try_collect()
    .await
    .unwrap()
}

// -----------------------------------------------------------------------
// Create / get
// -----------------------------------------------------------------------

#[tokio::test]
async fn create_root_round_trips() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    let org = repo
        .create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();

    assert_eq!(org.slug, "acme");
    assert_eq!(org.generation, 1);
    assert_eq!(org.interval(), Interval::ROOT);
    assert!(org.is_root(), "a new root must reference itself");

    let fetched = repo.get(&org.id.to_string()).await.unwrap();
    assert_eq!(fetched, org);
    assert_eq!(repo.get("acme").await.unwrap().id, org.id);
    assert_eq!(repo.get("Acme").await.unwrap().id, org.id);
}

#[tokio::test]
async fn root_creator_becomes_first_member() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);
    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();

    let members: Vec<User> = repo
        .members("acme", Pagination::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(members, vec![founder]);
}

#[tokio::test]
async fn duplicate_root_slug_is_rejected() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);
    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();

    let err = repo
        .create(founder.id, &new_org("ACME!", None, Visibility::Public))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ArborError::Duplicate { ref field, ref value, .. } if field == "slug" && value == "acme"),
        "expected duplicate slug, got {err:?}"
    );
}

#[tokio::test]
async fn unknown_creator_or_parent_is_not_found() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    let err = repo
        .create(Uuid::new_v4(), &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unknown creator: {err:?}");

    let err = repo
        .create(founder.id, &new_org("Eng", Some("nowhere"), Visibility::Public))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unknown parent: {err:?}");
}

#[tokio::test]
async fn shared_display_name_is_ambiguous() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);
    for root in ["Acme", "Globex"] {
        repo.create(founder.id, &new_org(root, None, Visibility::Public))
            .await
            .unwrap();
        repo.create(founder.id, &new_org("Eng", Some(root), Visibility::Public))
            .await
            .unwrap();
    }

    let err = repo.get("Eng").await.unwrap_err();
    assert!(matches!(err, ArborError::InvalidArgument { .. }), "{err:?}");
    assert_eq!(repo.get("globex.eng").await.unwrap().name, "Eng");
}

#[tokio::test]
async fn blank_name_is_invalid() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    let err = repo
        .create(founder.id, &new_org("   ", None, Visibility::Public))
        .await
        .unwrap_err();
    assert!(matches!(err, ArborError::InvalidArgument { .. }));
}

// -----------------------------------------------------------------------
// Nested-set layout
// -----------------------------------------------------------------------

#[tokio::test]
async fn child_inherits_ancestor_members() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let engineer = create_user(&pool, "Eli Engineer", "eli@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    let root = repo
        .create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    let eng = repo
        .create(founder.id, &new_org("Acme-Eng", Some("Acme"), Visibility::Public))
        .await
        .unwrap();

    assert_eq!(eng.slug, "acme.acme-eng");
    assert_eq!(eng.root_id, root.id);
    assert_eq!(eng.interval(), Interval::new(2, 3));
    let root_after = repo.get("acme").await.unwrap();
    assert_eq!(root_after.interval(), Interval::new(1, 4));
    assert_eq!(root_after.generation, root.generation + 1);

    repo.set_members("acme.acme-eng", MembershipChange::add(["eli@example.com"]))
        .await
        .unwrap();

    let eng_members: Vec<User> = repo
        .members("acme.acme-eng", Pagination::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(eng_members, vec![founder.clone(), engineer]);

    // Membership flows down the tree, never up.
    let root_members: Vec<User> = repo
        .members("acme", Pagination::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(root_members, vec![founder]);
}

#[tokio::test]
async fn insert_then_delete_restores_layout() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("A", Some("acme"), Visibility::Public))
        .await
        .unwrap();
    let before = tree(&repo, "acme").await;

    let leaf = repo
        .create(founder.id, &new_org("Leaf", Some("acme.a"), Visibility::Public))
        .await
        .unwrap();
    assert_eq!(repo.delete(founder.id, &leaf.id.to_string()).await.unwrap(), 1);

    let after = tree(&repo, "acme").await;
    let layout = |orgs: &[Organization]| -> Vec<(Uuid, Interval)> {
        orgs.iter().map(|o| (o.id, o.interval())).collect()
    };
    assert_eq!(layout(&before), layout(&after));
    assert_eq!(after[0].generation, before[0].generation + 2);
}

#[tokio::test]
async fn deleting_subtree_closes_the_gap() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    repo.create(founder.id, &new_org("Root", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("A", Some("root"), Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("A1", Some("root.a"), Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("B", Some("root"), Visibility::Public))
        .await
        .unwrap();

    assert_eq!(repo.get("root").await.unwrap().interval(), Interval::new(1, 8));
    assert_eq!(repo.get("root.a").await.unwrap().interval(), Interval::new(2, 5));
    assert_eq!(repo.get("root.a1").await.unwrap().interval(), Interval::new(3, 4));
    assert_eq!(repo.get("root.b").await.unwrap().interval(), Interval::new(6, 7));

    let deleted = repo.delete(founder.id, "root.a").await.unwrap();
    assert_eq!(deleted, 2);

    assert!(repo.get("root.a1").await.unwrap_err().is_not_found());
    assert_eq!(repo.get("root").await.unwrap().interval(), Interval::new(1, 4));
    assert_eq!(repo.get("root.b").await.unwrap().interval(), Interval::new(2, 3));

    let intervals: Vec<Interval> = tree(&repo, "root").await.iter().map(|o| o.interval()).collect();
    assert!(is_well_formed(&intervals));
}

#[tokio::test]
async fn children_lists_direct_descendants_only() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    repo.create(founder.id, &new_org("Root", None, Visibility::Public))
        .await
        .unwrap();
    for (name, parent) in [("A", "root"), ("A1", "root.a"), ("B", "root")] {
        repo.create(founder.id, &new_org(name, Some(parent), Visibility::Public))
            .await
            .unwrap();
    }

    let slugs = |orgs: Vec<Organization>| orgs.into_iter().map(|o| o.slug).collect::<Vec<_>>();
    let of_root: Vec<Organization> = repo
        .children("root")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slugs(of_root), vec!["root.a", "root.b"]);

    let of_a: Vec<Organization> = repo
        .children("root.a")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slugs(of_a), vec!["root.a1"]);
}

#[tokio::test]
async fn deleting_root_removes_tree_and_scoped_roles() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool.clone());
    let roles = SqlRoleRepository::new(pool);

    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();
    roles
        .create(
            founder.id,
            &CreateRole {
                name: "Editors".into(),
                scope: Some("acme.eng".into()),
                permissions: vec![],
            },
        )
        .await
        .unwrap();

    assert_eq!(repo.delete(founder.id, "acme").await.unwrap(), 2);
    assert!(repo.get("acme").await.unwrap_err().is_not_found());
    assert!(roles.get("acme.editors").await.unwrap_err().is_not_found());
}

// -----------------------------------------------------------------------
// Visibility
// -----------------------------------------------------------------------

#[tokio::test]
async fn private_parent_rejects_public_child() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    repo.create(founder.id, &new_org("Vault", None, Visibility::Private))
        .await
        .unwrap();

    let err = repo
        .create(founder.id, &new_org("Lobby", Some("vault"), Visibility::Public))
        .await
        .unwrap_err();
    assert!(matches!(err, ArborError::InvalidVisibility { .. }), "{err:?}");
    assert_eq!(tree(&repo, "vault").await.len(), 1, "no partial insert");

    let child = repo
        .create(founder.id, &new_org("Safe", Some("vault"), Visibility::Private))
        .await
        .unwrap();
    let err = repo
        .update(
            founder.id,
            &child,
            UpdateOrganization {
                visibility: Some(Visibility::Public),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArborError::InvalidVisibility { .. }), "{err:?}");
}

#[tokio::test]
async fn cannot_hide_node_with_public_descendants() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    let root = repo
        .create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();
    let root = repo.get(&root.id.to_string()).await.unwrap();

    let err = repo
        .update(
            founder.id,
            &root,
            UpdateOrganization {
                visibility: Some(Visibility::Private),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, ArborError::InvalidVisibility { ref child, .. } if child == "acme.eng"),
        "{err:?}"
    );
}

// -----------------------------------------------------------------------
// Update
// -----------------------------------------------------------------------

#[tokio::test]
async fn update_renames_within_namespace_and_bumps_generation() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    let eng = repo
        .create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();

    let renamed = repo
        .update(
            founder.id,
            &eng,
            UpdateOrganization {
                name: Some("Platform".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.slug, "acme.platform");
    assert_eq!(renamed.generation, eng.generation + 1);
    assert_eq!(renamed.interval(), eng.interval());

    // Same pre-image again: the generation no longer matches.
    let err = repo
        .update(
            founder.id,
            &eng,
            UpdateOrganization {
                name: Some("Infra".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArborError::ConcurrentUpdate { .. }), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(repo.get("acme.platform").await.unwrap().generation, renamed.generation);
}

#[tokio::test]
async fn renaming_root_moves_the_tree_namespace() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool.clone());
    let roles = SqlRoleRepository::new(pool);

    let acme = repo
        .create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();
    roles
        .create(
            founder.id,
            &CreateRole {
                name: "Admins".into(),
                scope: Some("acme".into()),
                permissions: vec![],
            },
        )
        .await
        .unwrap();

    let beta = repo
        .update(
            founder.id,
            &acme,
            UpdateOrganization {
                name: Some("Beta".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(beta.slug, "beta");

    let slugs: Vec<_> = tree(&repo, "beta").await.into_iter().map(|o| o.slug).collect();
    assert_eq!(slugs, vec!["beta", "beta.eng"]);
    assert_eq!(roles.get("beta.admins").await.unwrap().name, "Admins");
    assert!(repo.get("acme.eng").await.unwrap_err().is_not_found());

    // The old name is free again, children included.
    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    let eng = repo
        .create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();
    assert_eq!(eng.slug, "acme.eng");
    assert_ne!(eng.root_id, beta.id);
}

// -----------------------------------------------------------------------
// Members
// -----------------------------------------------------------------------

#[tokio::test]
async fn set_members_reports_rows_actually_changed() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    create_user(&pool, "Bo", "bo@example.com").await;
    create_user(&pool, "Cy", "cy@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);
    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();

    let counts = repo
        .set_members("acme", MembershipChange::add(["bo@example.com", "cy"]))
        .await
        .unwrap();
    assert_eq!((counts.added, counts.removed), (2, 0));

    let counts = repo
        .set_members("acme", MembershipChange::add(["bo", "una-founder"]))
        .await
        .unwrap();
    assert_eq!(counts.added, 0, "re-adding existing members affects no rows");

    let counts = repo
        .set_members("acme", MembershipChange::remove(["cy", "cy@example.com"]))
        .await
        .unwrap();
    assert_eq!(counts.removed, 1);

    let counts = repo
        .set_members("acme", MembershipChange::remove(["cy"]))
        .await
        .unwrap();
    assert_eq!(counts.removed, 0);
}

#[tokio::test]
async fn add_and_remove_same_user_writes_nothing() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let bo = create_user(&pool, "Bo", "bo@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);
    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();

    let err = repo
        .set_members(
            "acme",
            MembershipChange {
                add: vec!["bo@example.com".into(), "una-founder".into()],
                remove: vec![bo.id.to_string()],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArborError::InvalidArgument { .. }), "{err:?}");

    let members: Vec<User> = repo
        .members("acme", Pagination::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(members, vec![founder]);
}

#[tokio::test]
async fn unknown_member_is_not_found() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);
    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();

    let err = repo
        .set_members("acme", MembershipChange::add(["ghost@example.com"]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// -----------------------------------------------------------------------
// List
// -----------------------------------------------------------------------

#[tokio::test]
async fn list_filters_are_ored_within_and_anded_across_fields() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    repo.create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("Globex", None, Visibility::Private))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();

    let list = |filter: OrganizationFilter, pagination: Pagination| {
        let repo = &repo;
        async move {
            repo.list(filter, pagination)
                .await
                .unwrap()
                .try_collect::<Vec<_>>()
                .await
                .unwrap()
                .into_iter()
                .map(|o| o.slug)
                .collect::<Vec<_>>()
        }
    };

    let both = list(
        OrganizationFilter {
            identifiers: vec!["acme".into(), "Globex".into()],
            ..Default::default()
        },
        Pagination::default(),
    )
    .await;
    assert_eq!(both, vec!["acme", "globex"]);

    let private_only = list(
        OrganizationFilter {
            identifiers: vec!["acme".into(), "Globex".into()],
            visibility: vec![Visibility::Private],
            ..Default::default()
        },
        Pagination::default(),
    )
    .await;
    assert_eq!(private_only, vec!["globex"]);

    let first_page = list(OrganizationFilter::default(), Pagination { offset: 0, limit: 1 }).await;
    assert_eq!(first_page, vec!["acme"]);

    let acme_tree = list(
        OrganizationFilter {
            roots: vec!["acme".into()],
            ..Default::default()
        },
        Pagination::default(),
    )
    .await;
    assert_eq!(acme_tree, vec!["acme", "acme.eng"]);
}

#[tokio::test]
async fn list_matches_any_spelling_of_a_uuid() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool);

    let acme = repo
        .create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    repo.create(founder.id, &new_org("Eng", Some("acme"), Visibility::Public))
        .await
        .unwrap();

    for spelling in [
        acme.id.to_string().to_uppercase(),
        acme.id.simple().to_string(),
        format!("  {}  ", acme.id),
    ] {
        let by_id: Vec<Organization> = repo
            .list(
                OrganizationFilter {
                    identifiers: vec![spelling.clone()],
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1, "{spelling}");
        assert_eq!(by_id[0].id, acme.id);

        assert_eq!(tree(&repo, &spelling).await.len(), 2, "{spelling}");
    }
}

// -----------------------------------------------------------------------
// Event log
// -----------------------------------------------------------------------

#[tokio::test]
async fn committed_mutations_are_recorded_once() {
    let pool = setup().await;
    let founder = create_user(&pool, "Una Founder", "una@example.com").await;
    let repo = SqlOrganizationRepository::new(pool.clone());
    let events = SqlEventLog::new(pool);

    let org = repo
        .create(founder.id, &new_org("Acme", None, Visibility::Public))
        .await
        .unwrap();
    let updated = repo
        .update(
            founder.id,
            &org,
            UpdateOrganization {
                name: Some("Acme Corp".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Rolled back: no event.
    let _ = repo
        .update(founder.id, &org, UpdateOrganization::default())
        .await
        .unwrap_err();
    repo.delete(founder.id, "acme-corp").await.unwrap();

    let page = events
        .list(
            AuditEventFilter {
                object_id: Some(org.id),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    let kinds: Vec<EventKind> = page.items.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Create, EventKind::Modify, EventKind::Delete]);
    assert!(page.items.iter().all(|e| e.object_kind == ObjectKind::Organization));
    assert!(page.items.iter().all(|e| e.actor_id == founder.id));

    let create = &page.items[0];
    assert!(create.before.is_none() && create.after.is_some());
    let modify = &page.items[1];
    assert_eq!(modify.after.as_ref().unwrap()["name"], "Acme Corp");
    assert_eq!(modify.after.as_ref().unwrap()["generation"], updated.generation);
    let delete = &page.items[2];
    assert!(delete.before.is_some() && delete.after.is_none());
}
