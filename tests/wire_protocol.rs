use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use innkeep::clock::FixedClock;
use innkeep::engine::Engine;
use innkeep::wire::{self, InnkeepFactory};

const PASSWORD: &str = "innkeep";
const STAFF: &str = "frontdesk";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let clock = Arc::new(FixedClock::at_date(today));
    let engine = Arc::new(Engine::new(dir.join("innkeep.wal"), clock).unwrap());

    let factory = InnkeepFactory::new(
        engine.clone(),
        PASSWORD.to_string(),
        HashSet::from([STAFF.to_string()]),
    );
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("innkeep")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE and message of a failed statement.
async fn error_of(client: &Client, sql: &str) -> (String, String) {
    let err = client.simple_query(sql).await.unwrap_err();
    let db = err.as_db_error().expect("expected a server error");
    (db.code().code().to_string(), db.message().to_string())
}

async fn add_room(staff: &Client, number: &str, price: &str) -> Ulid {
    let id = Ulid::new();
    staff
        .batch_execute(&format!(
            "INSERT INTO rooms (id, room_number, price_per_night, capacity) \
             VALUES ('{id}', '{number}', {price}, 2)"
        ))
        .await
        .unwrap();
    id
}

fn book_sql(id: Ulid, room: Ulid, check_in: &str, check_out: &str) -> String {
    format!(
        "INSERT INTO bookings (id, room_id, check_in, check_out) \
         VALUES ('{id}', '{room}', '{check_in}', '{check_out}') RETURNING *"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;

    let room = add_room(&staff, "101", "100.00").await;

    let booking = Ulid::new();
    let created = rows(&alice, &book_sql(booking, room, "2024-01-10", "2024-01-13")).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("user_id"), Some("alice"));
    assert_eq!(created[0].get("nights"), Some("3"));
    assert_eq!(created[0].get("total_price"), Some("300.00"));
    assert_eq!(created[0].get("status"), Some("active"));

    let moved = rows(
        &alice,
        &format!("UPDATE bookings SET check_out = '2024-01-15' WHERE id = '{booking}' RETURNING *"),
    )
    .await;
    assert_eq!(moved[0].get("check_in"), Some("2024-01-10"));
    assert_eq!(moved[0].get("check_out"), Some("2024-01-15"));
    assert_eq!(moved[0].get("total_price"), Some("500.00"));

    let cancelled = rows(
        &alice,
        &format!("DELETE FROM bookings WHERE id = '{booking}' RETURNING *"),
    )
    .await;
    assert_eq!(cancelled[0].get("status"), Some("cancelled"));
    assert_eq!(cancelled[0].get("cancelled_by"), Some("alice"));

    let (code, message) = error_of(&alice, &format!("DELETE FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(code, "55000");
    assert!(message.starts_with("status: "), "{message}");
}

#[tokio::test]
async fn overlapping_booking_is_exclusion_violation() {
    let (addr, _engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;

    let room = add_room(&staff, "201", "80").await;
    rows(&alice, &book_sql(Ulid::new(), room, "2024-02-01", "2024-02-05")).await;

    let (code, message) = error_of(&bob, &book_sql(Ulid::new(), room, "2024-02-04", "2024-02-06")).await;
    assert_eq!(code, "23P01");
    assert!(message.starts_with("room: "), "{message}");

    // Checking out on the day the next guest checks in is fine.
    let touching = rows(&bob, &book_sql(Ulid::new(), room, "2024-02-05", "2024-02-07")).await;
    assert_eq!(touching.len(), 1);
}

#[tokio::test]
async fn validation_errors_are_field_scoped() {
    let (addr, _engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;
    let room = add_room(&staff, "301", "120").await;

    let (code, message) = error_of(&alice, &book_sql(Ulid::new(), room, "2023-12-20", "2023-12-22")).await;
    assert_eq!(code, "23514");
    assert!(message.starts_with("check_in: "), "{message}");

    let (code, message) = error_of(&alice, &book_sql(Ulid::new(), room, "2024-03-05", "2024-03-05")).await;
    assert_eq!(code, "23514");
    assert!(message.starts_with("check_out: "), "{message}");

    let (code, _) = error_of(&alice, "SELECT * FROM bookings WHERE nights = 2").await;
    assert_eq!(code, "42601");

    let (code, message) = error_of(&alice, &book_sql(Ulid::new(), room, "2024-13-01", "2024-13-04")).await;
    assert_eq!(code, "42601");
    assert!(message.starts_with("check_in: "), "{message}");

    let (code, message) = error_of(
        &staff,
        &format!("UPDATE rooms SET capacity = 'two' WHERE id = '{room}'"),
    )
    .await;
    assert_eq!(code, "42601");
    assert!(message.starts_with("capacity: "), "{message}");
}

#[tokio::test]
async fn guests_only_see_their_own_bookings() {
    let (addr, _engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;
    let room = add_room(&staff, "401", "60").await;

    let alices = Ulid::new();
    rows(&alice, &book_sql(alices, room, "2024-04-01", "2024-04-03")).await;
    rows(&bob, &book_sql(Ulid::new(), room, "2024-04-10", "2024-04-12")).await;

    assert_eq!(rows(&alice, "SELECT * FROM bookings").await.len(), 1);
    assert_eq!(rows(&bob, "SELECT * FROM bookings").await.len(), 1);
    assert_eq!(rows(&staff, "SELECT * FROM bookings").await.len(), 2);

    assert!(rows(&bob, &format!("SELECT * FROM bookings WHERE id = '{alices}'")).await.is_empty());
    let (code, _) = error_of(&bob, &format!("DELETE FROM bookings WHERE id = '{alices}'")).await;
    assert_eq!(code, "42501");

    let (code, _) = error_of(
        &alice,
        &format!("INSERT INTO rooms VALUES ('{}', '999', 10, 1)", Ulid::new()),
    )
    .await;
    assert_eq!(code, "42501");
}

#[tokio::test]
async fn availability_views() {
    let (addr, _engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;

    let booked = add_room(&staff, "501", "90").await;
    let free = add_room(&staff, "502", "90").await;
    let closed = add_room(&staff, "503", "90").await;
    staff
        .batch_execute(&format!("UPDATE rooms SET is_active = false WHERE id = '{closed}'"))
        .await
        .unwrap();

    let held = Ulid::new();
    rows(&alice, &book_sql(held, booked, "2024-05-10", "2024-05-15")).await;

    let available = rows(
        &alice,
        "SELECT * FROM available_rooms WHERE check_in = '2024-05-12' AND check_out = '2024-05-14'",
    )
    .await;
    let ids: Vec<&str> = available.iter().filter_map(|r| r.get("id")).collect();
    assert_eq!(ids, vec![free.to_string().as_str()]);

    let probe = rows(
        &alice,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{booked}' \
             AND check_in = '2024-05-14' AND check_out = '2024-05-16'"
        ),
    )
    .await;
    assert_eq!(probe[0].get("available"), Some("f"));
    assert_eq!(probe[0].get("conflicting_booking_id"), Some(held.to_string().as_str()));

    let own = rows(
        &alice,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{booked}' \
             AND check_in = '2024-05-14' AND check_out = '2024-05-16' AND exclude_id = '{held}'"
        ),
    )
    .await;
    assert_eq!(own[0].get("available"), Some("t"));
}

#[tokio::test]
async fn rooms_with_bookings_cannot_be_deleted() {
    let (addr, _engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;
    let room = add_room(&staff, "601", "70").await;
    let empty = add_room(&staff, "602", "70").await;
    rows(&alice, &book_sql(Ulid::new(), room, "2024-06-01", "2024-06-02")).await;

    let (code, _) = error_of(&staff, &format!("DELETE FROM rooms WHERE id = '{room}'")).await;
    assert_eq!(code, "23503");

    staff
        .batch_execute(&format!("DELETE FROM rooms WHERE id = '{empty}'"))
        .await
        .unwrap();
    assert!(rows(&staff, &format!("SELECT * FROM rooms WHERE id = '{empty}'")).await.is_empty());

    let (code, message) = error_of(
        &staff,
        &format!("INSERT INTO rooms VALUES ('{}', '601', 50, 1)", Ulid::new()),
    )
    .await;
    assert_eq!(code, "23505");
    assert!(message.starts_with("room_number: "), "{message}");
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, engine) = start_test_server().await;
    let staff = connect(addr, STAFF).await;
    let alice = connect(addr, "alice").await;
    let room = add_room(&staff, "701", "110").await;

    let booking = Ulid::new();
    let inserted = alice
        .execute(
            "INSERT INTO bookings (id, room_id, check_in, check_out) VALUES ($1, $2, $3, $4)",
            &[
                &booking.to_string(),
                &room.to_string(),
                &"2024-07-01".to_string(),
                &"2024-07-04".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let cancelled = alice
        .execute("DELETE FROM bookings WHERE id = $1", &[&booking.to_string()])
        .await
        .unwrap();
    assert_eq!(cancelled, 1);

    let actor = innkeep::model::Actor::admin(STAFF);
    let stored = engine.get_booking(&actor, &booking).await.unwrap();
    assert!(!stored.is_active());
}
