//! End-to-end bitemporal behavior against the in-memory backend

use proptest::prelude::*;
use std::sync::Arc;
use temporal_versioning::prelude::*;
use temporal_versioning::versioning::application;

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry
        .register(
            EntitySchema::new("Author", "authors")
                .application_versioned()
                .system_versioned()
                .with_association(AssociationDef::has_many("books", "Book", "author_id"))
                .with_association(AssociationDef::has_many_through("pictures", "books", "pictures")),
        )
        .unwrap();
    registry
        .register(
            EntitySchema::new("Book", "books")
                .system_versioned()
                .with_association(AssociationDef::belongs_to("author", "Author"))
                .with_association(AssociationDef::has_many_as("pictures", "Picture", "imageable")),
        )
        .unwrap();
    registry
        .register(
            EntitySchema::new("Picture", "pictures")
                .system_versioned()
                .with_association(AssociationDef::belongs_to_polymorphic("imageable")),
        )
        .unwrap();
    let desert = registry
        .register(
            EntitySchema::new("Desert", "deserts")
                .system_versioned()
                .with_inheritance_column("type"),
        )
        .unwrap();
    registry.register(EntitySchema::subtype("CoolWhip", &desert)).unwrap();
    registry
}

fn migration(config: &VersioningConfig) -> Migration {
    let mut migration = Migration::new("create_library", config.clone());
    migration.enable_extension("btree_gist");
    migration
        .create_table("authors", TableOptions::bitemporal(), |t| {
            t.string("name");
        })
        .unwrap()
        .create_table("books", TableOptions::system_versioned(), |t| {
            t.string("title");
            t.references("author");
        })
        .unwrap()
        .create_table("pictures", TableOptions::system_versioned(), |t| {
            t.string("url");
            t.references("imageable");
            t.string("imageable_type");
        })
        .unwrap()
        .create_table("deserts", TableOptions::system_versioned(), |t| {
            t.string("type");
            t.string("flavor");
        })
        .unwrap();
    migration
}

/// Store whose transactions commit at the manual clock's time, starting at 1000s
async fn library() -> (TemporalDB, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(ts(1_000)));
    let db = TemporalDB::in_memory_with_clock(registry(), VersioningConfig::default(), clock.clone())
        .unwrap();
    db.migrate(&migration(db.config())).await.unwrap();
    (db, clock)
}

fn titles(records: &[Record]) -> Vec<String> {
    let mut titles: Vec<String> = records
        .iter()
        .filter_map(|r| r.get("title").as_text().map(str::to_string))
        .collect();
    titles.sort();
    titles
}

#[tokio::test]
async fn revise_at_closes_old_and_opens_successor() {
    let (db, _) = library().await;
    let t0 = ts(0);
    let mut v1 = db
        .originate_at("Author", t0, Row::new().with("name", "Bob"))
        .await
        .unwrap();
    assert_eq!(v1.version(), Some(1));
    assert_eq!(v1.range("validity"), Some(&TemporalRange::from(t0)));

    let v2 = db
        .revise_at(&mut v1, ts(1), &Row::new().with("name", "Sam"))
        .await
        .unwrap();
    assert_eq!(v1.range("validity"), Some(&TemporalRange::between(t0, ts(1)).unwrap()));
    assert_eq!(v2.range("validity"), Some(&TemporalRange::from(ts(1))));
    assert_eq!(v2.version(), Some(2));
    assert_eq!(v2.identity(), v1.identity());

    let scope = TimeScope::new();
    let head = db.load(&db.live("Author").unwrap(), &scope).await.unwrap();
    assert_eq!(head.len(), 1);
    assert_eq!(head[0].get("name"), &Value::from("Sam"));

    let earlier = db.live("Author").unwrap().as_of("validity", ts(0)).unwrap();
    let earlier = db.load(&earlier, &scope).await.unwrap();
    assert_eq!(earlier.len(), 1);
    assert_eq!(earlier[0].get("name"), &Value::from("Bob"));
}

#[tokio::test]
async fn forced_overlap_fails_at_commit() {
    let (db, _) = library().await;
    let v1 = db.originate_at("Author", ts(0), Row::new()).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let overlapping = Row::new()
        .with("id", v1.get("id").clone())
        .with("version", 2i64)
        .with("validity", TemporalRange::from(ts(5)));
    // The statement succeeds; the deferred constraint fires at commit
    tx.insert("authors", overlapping).await.unwrap();
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation { .. }), "{err}");

    assert_eq!(db.database().rows("authors").await.unwrap().len(), 1);
}

#[tokio::test]
async fn closed_revisions_reject_every_operation() {
    let (db, _) = library().await;
    let mut v1 = db.originate_at("Author", ts(0), Row::new()).await.unwrap();
    db.revise_at(&mut v1, ts(10), &Row::new()).await.unwrap();
    let closed = v1.clone();

    for time in [ts(-5), ts(0), ts(5), ts(10), ts(500)] {
        let err = db.revise_at(&mut v1, time, &Row::new()).await.unwrap_err();
        assert!(matches!(err, Error::ClosedRevision { .. }));
        let err = db.inactivate_at(&mut v1, time).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot inactivate closed version of Author");
        assert!(matches!(
            application::revision_at(&mut v1, time, &Row::new()),
            Err(Error::ClosedRevision { .. })
        ));
        assert_eq!(v1, closed);
    }
}

#[tokio::test]
async fn updates_in_one_transaction_make_one_transition() {
    let (db, clock) = library().await;
    let book = db
        .create("Book", Row::new().with("title", "Draft"))
        .await
        .unwrap();
    clock.advance_secs(10);

    let mut tx = db.begin().await.unwrap();
    tx.update("books", &book.key(), &Row::new().with("title", "Second"))
        .await
        .unwrap();
    tx.update("books", &book.key(), &Row::new().with("title", "Final"))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let history = db.database().rows("books_history").await.unwrap();
    assert_eq!(history.len(), 2);
    let finals: Vec<_> = history
        .iter()
        .filter(|r| r.get("system_period").as_range().map(TemporalRange::is_open) == Some(true))
        .collect();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].get("title"), &Value::from("Final"));
    assert_eq!(
        finals[0].get("system_period").as_range().map(TemporalRange::start),
        Some(ts(1_010))
    );

    clock.advance_secs(10);
    let mut tx = db.begin().await.unwrap();
    tx.update("books", &book.key(), &Row::new().with("title", "Final"))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(db.database().rows("books_history").await.unwrap().len(), 2);
}

#[tokio::test]
async fn insert_then_delete_in_one_transaction_leaves_no_history() {
    let (db, _) = library().await;
    let mut tx = db.begin().await.unwrap();
    let row = tx
        .insert("books", Row::new().with("title", "Ephemeral"))
        .await
        .unwrap();
    tx.delete("books", &Row::new().with("id", row.get("id").clone()))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert!(db.database().rows("books_history").await.unwrap().is_empty());
}

#[tokio::test]
async fn deleted_rows_disappear_from_that_transaction_time() {
    let (db, clock) = library().await;
    let scope = TimeScope::new();
    let book = db
        .create("Book", Row::new().with("title", "Gone"))
        .await
        .unwrap();
    clock.advance_secs(10);
    db.destroy(&book).await.unwrap();

    for (instant, expected) in [(ts(999), 0), (ts(1_000), 1), (ts(1_009), 1), (ts(1_010), 0), (ts(2_000), 0)] {
        let relation = db.as_of("Book", [("system_period", instant)]).unwrap();
        assert_eq!(db.load(&relation, &scope).await.unwrap().len(), expected, "at {instant}");
    }
    assert!(db.load(&db.live("Book").unwrap(), &scope).await.unwrap().is_empty());
}

#[tokio::test]
async fn both_dimensions_must_cover_the_instant() {
    let (db, _) = library().await;
    let scope = TimeScope::new();
    let effective = ts(100);
    let committed = ts(1_000);
    db.originate_at("Author", effective, Row::new().with("name", "Ann"))
        .await
        .unwrap();

    let cases = [
        (effective.sub_nanos(1), committed.add_nanos(1), 0),
        (effective.add_nanos(1), committed.add_nanos(1), 1),
        (effective, committed, 1),
        (effective.add_nanos(1), committed.sub_nanos(1), 0),
    ];
    for (validity, system, expected) in cases {
        let relation = db
            .as_of("Author", [("validity", validity), ("system_period", system)])
            .unwrap();
        assert_eq!(
            db.load(&relation, &scope).await.unwrap().len(),
            expected,
            "validity {validity}, system {system}"
        );
    }

    let at_time = db.at_time("Author", committed.add_nanos(1)).unwrap();
    assert_eq!(db.load(&at_time, &scope).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_dimensions_are_rejected() {
    let (db, _) = library().await;
    let err = db.as_of("Book", [("validity", ts(0))]).unwrap_err();
    assert!(matches!(err, Error::UnknownDimension { .. }));
    assert!(err.to_string().contains("History::Book"));
}

async fn load_missing_entity(db: &TemporalDB, scope: &mut TimeScope) -> Result<Vec<Record>> {
    let guard = scope.push([("validity", ts(15))]);
    assert_eq!(guard.lookup("validity"), Some(ts(15)));
    db.load(&db.live("Ghost")?, &guard).await
}

#[tokio::test]
async fn nested_scopes_restore_outer_bindings() {
    let (db, _) = library().await;
    let mut v1 = db
        .originate_at("Author", ts(0), Row::new().with("name", "Bob"))
        .await
        .unwrap();
    db.revise_at(&mut v1, ts(10), &Row::new().with("name", "Sam"))
        .await
        .unwrap();
    let authors = db.live("Author").unwrap();

    let mut scope = TimeScope::new();
    {
        let mut outer = scope.push([("validity", ts(5))]);
        {
            let inner = outer.push([("validity", ts(15))]);
            let found = db.load(&authors, &inner).await.unwrap();
            assert_eq!(found[0].get("name"), &Value::from("Sam"));
        }
        let found = db.load(&authors, &outer).await.unwrap();
        assert_eq!(found[0].get("name"), &Value::from("Bob"));

        assert!(load_missing_entity(&db, &mut outer).await.is_err());
        assert_eq!(outer.lookup("validity"), Some(ts(5)));
        assert_eq!(outer.depth(), 1);
    }
    assert!(scope.is_empty());
    assert_eq!(scope.lookup("validity"), None);

    // Explicit bindings win over the ambient scope
    let mut guard = scope.push([("validity", ts(5))]);
    let explicit = authors.clone().as_of("validity", ts(15)).unwrap();
    let found = db.load(&explicit, &guard).await.unwrap();
    assert_eq!(found[0].get("name"), &Value::from("Sam"));
    guard.at([("validity", ts(20))], |s| assert_eq!(s.lookup("validity"), Some(ts(20))));
    assert_eq!(guard.lookup("validity"), Some(ts(5)));
}

#[tokio::test]
async fn association_traversal_stays_within_the_instant() {
    let (db, clock) = library().await;
    let author = db
        .originate_at("Author", ts(0), Row::new().with("name", "Ann"))
        .await
        .unwrap();
    let author_id = author.get("id").clone();
    let mut first = db
        .create(
            "Book",
            Row::new().with("title", "A").with("author_id", author_id.clone()),
        )
        .await
        .unwrap();

    clock.advance_secs(10);
    db.update(&mut first, &Row::new().with("title", "A2")).await.unwrap();
    let second = db
        .create(
            "Book",
            Row::new().with("title", "B").with("author_id", author_id.clone()),
        )
        .await
        .unwrap();
    db.create(
        "Picture",
        Row::new()
            .with("url", "cover.png")
            .with("imageable_id", first.get("id").clone())
            .with("imageable_type", "Book"),
    )
    .await
    .unwrap();
    // Same key, different owner type: never reached from a book
    db.create(
        "Picture",
        Row::new()
            .with("url", "stray.png")
            .with("imageable_id", first.get("id").clone())
            .with("imageable_type", "Desert"),
    )
    .await
    .unwrap();

    clock.advance_secs(10);
    db.destroy(&first).await.unwrap();

    let mut scope = TimeScope::new();
    let history = db.history("Author").unwrap();

    let expectations: [(i64, Vec<&str>, usize); 3] = [
        (1_005, vec!["A"], 0),
        (1_015, vec!["A2", "B"], 1),
        (1_025, vec!["B"], 0),
    ];
    for (instant, expected_titles, expected_pictures) in expectations {
        let guard = scope.push([("system_period", ts(instant))]);
        let owner = db.first(&history, &guard).await.unwrap().unwrap();
        assert_eq!(owner.time_tags().get("system_period"), Some(&ts(instant)));

        let books = db.association(&owner, "books", &guard).await.unwrap();
        assert_eq!(titles(&books), expected_titles, "books at {instant}");
        assert!(books.iter().all(|b| b.entity() == "History::Book"));
        assert!(books
            .iter()
            .all(|b| b.time_tags().get("system_period") == Some(&ts(instant))));

        let pictures = db.association(&owner, "pictures", &guard).await.unwrap();
        assert_eq!(pictures.len(), expected_pictures, "pictures at {instant}");
    }

    // Tags ride along without an ambient scope
    let then = db.as_of("Picture", [("system_period", ts(1_015))]).unwrap();
    let pictures = db.load(&then, &scope).await.unwrap();
    let cover = pictures
        .iter()
        .find(|p| p.get("url") == &Value::from("cover.png"))
        .unwrap();
    let imageable = db.association(cover, "imageable", &scope).await.unwrap();
    assert_eq!(titles(&imageable), vec!["A2"]);
    let owner = db.association(&imageable[0], "author", &scope).await.unwrap();
    assert_eq!(owner.len(), 1);
    assert_eq!(owner[0].entity(), "History::Author");

    // Live traversal sees current rows only
    let live_author = db.first(&db.live("Author").unwrap(), &scope).await.unwrap().unwrap();
    let live_books = db.association(&live_author, "books", &scope).await.unwrap();
    assert_eq!(titles(&live_books), vec!["B"]);
    assert_eq!(live_books[0].get("id"), second.get("id"));
    assert!(matches!(
        db.association(&live_author, "editors", &scope).await,
        Err(Error::UnknownAssociation { .. })
    ));
}

#[tokio::test]
async fn subtypes_load_as_their_history_subtype() {
    let (db, clock) = library().await;
    let scope = TimeScope::new();
    let whip = db
        .create("CoolWhip", Row::new().with("flavor", "vanilla"))
        .await
        .unwrap();
    assert_eq!(whip.get("type"), &Value::from("CoolWhip"));
    db.create("Desert", Row::new().with("flavor", "plain")).await.unwrap();
    let later = clock.advance_secs(1);

    let live = db.load(&db.live("CoolWhip").unwrap(), &scope).await.unwrap();
    assert_eq!(live.len(), 1);

    let history = db.as_of("Desert", [("system_period", later)]).unwrap();
    let mut entities: Vec<String> = db
        .load(&history, &scope)
        .await
        .unwrap()
        .iter()
        .map(|r| r.entity().to_string())
        .collect();
    entities.sort();
    assert_eq!(entities, vec!["History::CoolWhip", "History::Desert"]);

    let only_whips = db.history("CoolWhip").unwrap().at_time(later);
    let whips = db.load(&only_whips, &scope).await.unwrap();
    assert_eq!(whips.len(), 1);
    assert_eq!(whips[0].view().table, "deserts_history");
}

#[tokio::test]
async fn namespaced_counterparts_resolve_by_full_name() {
    let mut registry = EntityRegistry::new();
    registry
        .register(EntitySchema::new("MyApp::Widget", "widgets").system_versioned())
        .unwrap();
    let mut resolver = HistoryResolver::new(registry, VersioningConfig::default());
    resolver.namespace_mut().namespace("MyApp");
    let db = TemporalDB::new(MemoryDatabase::new(), resolver).unwrap();

    let mut migration = Migration::new("create_widgets", db.config().clone());
    migration.enable_extension("btree_gist");
    migration
        .create_table("widgets", TableOptions::system_versioned(), |t| {
            t.string("label");
        })
        .unwrap();
    db.migrate(&migration).await.unwrap();
    db.create("MyApp::Widget", Row::new().with("label", "gear"))
        .await
        .unwrap();

    let widgets = db.history_model("History::MyApp::Widget").unwrap();
    let found = db.load(&widgets, &TimeScope::new()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].entity(), "History::MyApp::Widget");

    assert!(matches!(
        db.history_model("History::MyApp::Gadget"),
        Err(Error::UnresolvedHistoryName { .. })
    ));
    assert!(matches!(
        db.history_model("History::Widget"),
        Err(Error::UnresolvedHistoryName { .. })
    ));
}

#[tokio::test]
async fn rolling_back_one_table_keeps_other_tables_constrained() {
    let (db, _) = library().await;
    let author = db.originate_at("Author", ts(0), Row::new()).await.unwrap();

    let mut editors = Migration::new("create_editors", db.config().clone());
    editors
        .create_table("editors", TableOptions::application_versioned(), |t| {
            t.string("name");
        })
        .unwrap();
    db.migrate(&editors).await.unwrap();
    assert!(!editors.down_sql().unwrap().iter().any(|s| s.contains("EXTENSION")));
    db.rollback(&editors).await.unwrap();
    assert!(!db.database().table_exists("editors").await);

    // Dropping the extension itself is refused while versioned tables remain
    let mut gist = Migration::new("enable_gist", db.config().clone());
    gist.enable_extension("btree_gist");
    let err = db.rollback(&gist).await.unwrap_err();
    assert!(err.to_string().contains("btree_gist"), "{err}");

    let mut tx = db.begin().await.unwrap();
    tx.insert(
        "authors",
        Row::new()
            .with("id", author.get("id").clone())
            .with("version", 2i64)
            .with("validity", TemporalRange::from(ts(5))),
    )
    .await
    .unwrap();
    assert!(matches!(
        tx.commit().await.unwrap_err(),
        Error::ConstraintViolation { .. }
    ));

    let mut tx = db.begin().await.unwrap();
    let book = tx.insert("books", Row::new().with("title", "Kept")).await.unwrap();
    tx.insert(
        "books_history",
        Row::new()
            .with("id", book.get("id").clone())
            .with("title", "Forged")
            .with("system_period", TemporalRange::from(ts(0))),
    )
    .await
    .unwrap();
    assert!(tx.commit().await.is_err());
}

#[tokio::test]
async fn custom_configuration_flows_from_file_to_queries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versioning.json");
    std::fs::write(
        &path,
        r#"{
            "application_dimension": "effective",
            "system_dimension": "recorded",
            "version_column": "revision",
            "default_primary_key": "uid",
            "history_suffix": "_versions"
        }"#,
    )
    .unwrap();
    let config = VersioningConfig::from_file(&path).unwrap();

    let mut registry = EntityRegistry::new();
    registry
        .register(
            EntitySchema::new("Author", "authors")
                .application_versioned()
                .system_versioned(),
        )
        .unwrap();
    let clock = Arc::new(ManualClock::new(ts(1_000)));
    let db = TemporalDB::in_memory_with_clock(registry, config, clock.clone()).unwrap();

    let mut migration = Migration::new("create_authors", db.config().clone());
    migration.enable_extension("btree_gist");
    migration
        .create_table("authors", TableOptions::bitemporal(), |t| {
            t.string("name");
        })
        .unwrap();
    db.migrate(&migration).await.unwrap();

    let mut v1 = db
        .originate_at("Author", ts(0), Row::new().with("name", "Bob"))
        .await
        .unwrap();
    assert_eq!(v1.version(), Some(1));
    clock.advance_secs(10);
    let v2 = db
        .revise_at(&mut v1, ts(5), &Row::new().with("name", "Sam"))
        .await
        .unwrap();
    assert_eq!(v2.version(), Some(2));
    assert_eq!(v2.get("uid"), v1.get("uid"));
    assert_eq!(v1.range("effective"), Some(&TemporalRange::between(ts(0), ts(5)).unwrap()));

    let scope = TimeScope::new();
    let cases = [(ts(1), ts(1_005), "Bob"), (ts(1), ts(1_015), "Bob"), (ts(7), ts(1_015), "Sam")];
    for (effective, recorded, name) in cases {
        let relation = db
            .as_of("Author", [("effective", effective), ("recorded", recorded)])
            .unwrap();
        let found = db.load(&relation, &scope).await.unwrap();
        assert_eq!(found.len(), 1, "effective {effective}, recorded {recorded}");
        assert_eq!(found[0].get("name"), &Value::from(name));
    }
    let before_revision = db
        .as_of("Author", [("effective", ts(7)), ("recorded", ts(1_005))])
        .unwrap();
    assert_eq!(
        db.load(&before_revision, &scope).await.unwrap()[0].get("name"),
        &Value::from("Bob")
    );

    assert_eq!(db.database().rows("authors_versions").await.unwrap().len(), 3);
    assert!(matches!(
        db.as_of("Author", [("validity", ts(1))]),
        Err(Error::UnknownDimension { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn revisions_tile_validity_with_one_head(steps in proptest::collection::vec(1i64..50, 1..8)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let rows = runtime.block_on(async {
            let (db, clock) = library().await;
            let mut head = db.originate_at("Author", ts(0), Row::new()).await.unwrap();
            let mut at = 0;
            for step in &steps {
                at += step;
                clock.advance_secs(1);
                head = db.revise_at(&mut head, ts(at), &Row::new()).await.unwrap();
            }
            db.database().rows("authors").await.unwrap()
        });

        let mut revisions: Vec<(i64, TemporalRange)> = rows
            .iter()
            .map(|r| (r.get("version").as_int().unwrap(), r.get("validity").as_range().cloned().unwrap()))
            .collect();
        revisions.sort_by_key(|(version, _)| *version);

        prop_assert_eq!(revisions.len(), steps.len() + 1);
        prop_assert_eq!(revisions.iter().filter(|(_, range)| range.is_open()).count(), 1);
        for (i, pair) in revisions.windows(2).enumerate() {
            let (v, earlier) = &pair[0];
            let (next, later) = &pair[1];
            prop_assert_eq!(*v, i as i64 + 1);
            prop_assert_eq!(*next, *v + 1);
            prop_assert_eq!(earlier.end(), Some(later.start()));
            prop_assert!(!earlier.overlaps(later));
        }
    }
}
