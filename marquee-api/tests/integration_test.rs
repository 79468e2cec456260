use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

use marquee_api::{app, AppState};
use marquee_booking::BookingPolicy;
use marquee_catalog::{Catalog, MemoryInventory, PricingEngine, SeedConfig};
use marquee_core::{LockId, LockState, SeatRecord, SessionId, ShowtimeId, TicketTypeId};
use marquee_lock::{LockPolicy, MemoryLockTable};

struct Harness {
    app: Router,
    state: AppState,
    showtime_id: ShowtimeId,
    seats: Vec<SeatRecord>,
    adult: TicketTypeId,
}

impl Harness {
    fn seat(&self, label: &str) -> String {
        self.seats
            .iter()
            .find(|s| s.label() == label)
            .unwrap()
            .seat_id
            .to_string()
    }

    fn lock_body(&self, labels: &[&str]) -> Value {
        let seats: Vec<Value> = labels
            .iter()
            .map(|l| json!({ "showtimeSeatId": self.seat(l), "ticketTypeId": self.adult.to_string() }))
            .collect();
        json!({ "showtimeId": self.showtime_id.to_string(), "seats": seats })
    }

    async fn send(&self, method: Method, uri: &str, session: Option<SessionId>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder.header("X-Session-Id", session.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn lock(&self, session: SessionId, labels: &[&str]) -> (StatusCode, Value) {
        self.send(Method::POST, "/seat-locks", Some(session), Some(self.lock_body(labels)))
            .await
    }

    async fn confirm(&self, session: SessionId, lock_id: &str) -> (StatusCode, Value) {
        let body = json!({
            "lockId": lock_id,
            "guestInfo": { "email": "k6_guest@loadtest.local", "username": "K6 User", "phoneNumber": "+84900000000" },
            "snackCombos": []
        });
        self.send(Method::POST, "/bookings/confirm", Some(session), Some(body)).await
    }

    async fn availability(&self) -> Value {
        let uri = format!("/seat-locks/availability/{}", self.showtime_id);
        let (status, body) = self.send(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

async fn harness(hold: chrono::Duration) -> Harness {
    let catalog = Arc::new(Catalog::from_seed(&SeedConfig::default(), Utc::now()));
    let inventory = Arc::new(MemoryInventory::new());
    let state = AppState::new(
        catalog.clone(),
        Arc::new(PricingEngine::default()),
        Arc::new(MemoryLockTable::new()),
        inventory.clone(),
        LockPolicy { hold, ..LockPolicy::default() },
        BookingPolicy::default(),
    );
    state.seed_inventory(inventory.as_ref()).await.unwrap();

    let showtime_id = catalog.showtimes().next().unwrap().showtime_id;
    let seats = catalog.seat_layout(showtime_id).unwrap();
    let adult = catalog
        .ticket_types_for(showtime_id)
        .unwrap()
        .into_iter()
        .find(|t| t.code == "k6_adult")
        .unwrap()
        .ticket_type_id;

    Harness {
        app: app(state.clone()),
        state,
        showtime_id,
        seats,
        adult,
    }
}

fn len_of(value: &Value, field: &str) -> usize {
    value[field].as_array().map(|a| a.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_catalog_endpoints() {
    let h = harness(chrono::Duration::seconds(300)).await;

    let (status, movies) = h.send(Method::GET, "/movies", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let movie_id = movies[0]["movieId"].as_str().unwrap().to_string();

    let (status, showtimes) = h
        .send(Method::GET, &format!("/showtimes/movie/{}/upcoming", movie_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(showtimes.as_array().unwrap().len(), 3);

    let (status, seats) = h
        .send(Method::GET, &format!("/showtime-seats/showtime/{}/available", h.showtime_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seats.as_array().unwrap().len(), 100);

    let (status, ticket_types) = h
        .send(Method::GET, &format!("/ticket-types?showtimeId={}", h.showtime_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let student = ticket_types
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["code"] == "k6_student")
        .unwrap();
    assert_eq!(student["price"], 72_000);

    let (status, snacks) = h.send(Method::GET, "/snacks", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snacks.as_array().unwrap().len(), 3);

    let (status, _) = h
        .send(Method::GET, &format!("/showtimes/movie/{}/upcoming", uuid::Uuid::new_v4()), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_header_is_required_and_validated() {
    let h = harness(chrono::Duration::seconds(300)).await;

    let (status, body) = h
        .send(Method::POST, "/seat-locks", None, Some(h.lock_body(&["C5"])))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/seat-locks")
        .header("X-Session-Id", "not-a-uuid")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(h.lock_body(&["C5"]).to_string()))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_two_sessions_one_seat() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let (first, second) = (SessionId::generate(), SessionId::generate());

    let (status, body) = h.lock(first, &["C5"]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["lockId"].is_string());
    assert!(body["expiresAt"].is_string());

    let (status, body) = h.lock(second, &["C5", "C6"]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["conflictingSeats"], json!([h.seat("C5")]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_one_winner() {
    let h = Arc::new(harness(chrono::Duration::seconds(300)).await);

    let mut tasks = Vec::new();
    for i in 0..24 {
        let h = h.clone();
        // Every request overlaps on D5.
        let labels: &'static [&'static str] = if i % 2 == 0 { &["D5", "D6"] } else { &["D4", "D5"] };
        tasks.push(tokio::spawn(async move { h.lock(SessionId::generate(), labels).await.0 }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(len_of(&h.availability().await, "lockedSeats"), 2);
}

#[tokio::test]
async fn test_one_live_lock_per_session_per_showtime() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();

    assert_eq!(h.lock(session, &["E5"]).await.0, StatusCode::CREATED);
    let (status, _) = h.lock(session, &["E6"]).await;
    assert_eq!(status, StatusCode::LOCKED);
}

#[tokio::test]
async fn test_full_booking_workflow() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();

    let (status, lock) = h.lock(session, &["C4", "C5", "C6"]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(len_of(&lock, "lockedSeats"), 3);
    assert_eq!(lock["totalPrice"], 270_000);
    let lock_id = lock["lockId"].as_str().unwrap().to_string();

    let availability = h.availability().await;
    assert_eq!(len_of(&availability, "lockedSeats"), 3);
    assert_eq!(len_of(&availability, "availableSeats"), 97);

    let (status, preview) = h
        .send(
            Method::POST,
            "/bookings/price-preview",
            Some(session),
            Some(json!({ "lockId": lock_id, "snacks": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["subtotal"], 270_000);
    assert_eq!(preview["total"], 270_000);

    let (status, booking) = h.confirm(session, &lock_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "PENDING_PAYMENT");
    assert_eq!(booking["finalPrice"], 270_000);
    assert!(booking["bookingId"].is_string());

    let availability = h.availability().await;
    assert_eq!(len_of(&availability, "bookedSeats"), 3);
    assert_eq!(len_of(&availability, "lockedSeats"), 0);

    // A consumed lock never confirms twice.
    let (status, _) = h.confirm(session, &lock_id).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Booked seats stay out of reach of other sessions.
    let (status, _) = h.lock(SessionId::generate(), &["C5"]).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_confirm_after_hold_expiry_is_gone() {
    let h = harness(chrono::Duration::seconds(1)).await;
    let session = SessionId::generate();

    let (status, lock) = h.lock(session, &["F5", "F6"]).await;
    assert_eq!(status, StatusCode::CREATED);
    let lock_id = lock["lockId"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(1300)).await;

    let (status, _) = h.confirm(session, &lock_id).await;
    assert_eq!(status, StatusCode::GONE);

    let availability = h.availability().await;
    assert_eq!(len_of(&availability, "bookedSeats"), 0);
    assert_eq!(len_of(&availability, "lockedSeats"), 0);
    assert_eq!(len_of(&availability, "availableSeats"), 100);
}

#[tokio::test]
async fn test_release_then_confirm_is_not_found() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();

    let (_, lock) = h.lock(session, &["G5"]).await;
    let lock_id = lock["lockId"].as_str().unwrap().to_string();

    let uri = format!("/seat-locks/showtime/{}", h.showtime_id);
    let (status, _) = h.send(Method::DELETE, &uri, Some(session), None).await;
    assert_eq!(status, StatusCode::OK);

    // Releasing again is a harmless no-op.
    let (status, _) = h.send(Method::DELETE, &uri, Some(session), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h
        .send(Method::DELETE, &format!("/seat-locks/{}", lock_id), Some(session), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.confirm(session, &lock_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(len_of(&h.availability().await, "availableSeats"), 100);
}

#[tokio::test]
async fn test_only_owner_may_extend_or_release() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let (owner, stranger) = (SessionId::generate(), SessionId::generate());

    let (_, lock) = h.lock(owner, &["H5"]).await;
    let lock_id = lock["lockId"].as_str().unwrap().to_string();

    let extend = format!("/seat-locks/{}/extend", lock_id);
    assert_eq!(h.send(Method::PATCH, &extend, Some(stranger), None).await.0, StatusCode::FORBIDDEN);
    let (status, extended) = h.send(Method::PATCH, &extend, Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(extended["remainingSeconds"].as_i64().unwrap() > 0);

    let release = format!("/seat-locks/{}", lock_id);
    assert_eq!(h.send(Method::DELETE, &release, Some(stranger), None).await.0, StatusCode::FORBIDDEN);
    assert_eq!(h.send(Method::DELETE, &release, Some(owner), None).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_availability_reports_own_lock() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();
    let (_, lock) = h.lock(session, &["B3", "B4"]).await;

    let uri = format!("/seat-locks/availability/{}", h.showtime_id);
    let (status, body) = h.send(Method::GET, &uri, Some(session), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionLockInfo"]["lockId"], lock["lockId"]);
    assert_eq!(len_of(&body["sessionLockInfo"], "myLockedSeats"), 2);

    let (_, anonymous) = h.send(Method::GET, &uri, None, None).await;
    assert!(anonymous.get("sessionLockInfo").is_none());
}

#[tokio::test]
async fn test_reaper_reclaims_unreleased_lock() {
    let h = harness(chrono::Duration::seconds(1)).await;
    let session = SessionId::generate();
    let (_, lock) = h.lock(session, &["A5"]).await;
    let lock_id: LockId = lock["lockId"].as_str().unwrap().parse().unwrap();

    let (tx, rx) = watch::channel(false);
    let reaper = h.state.reaper(std::time::Duration::from_millis(50)).spawn(rx);
    tokio::time::sleep(std::time::Duration::from_millis(1400)).await;
    tx.send(true).unwrap();
    reaper.await.unwrap();

    assert_eq!(h.state.locks.lock(lock_id).await.unwrap().state, LockState::Expired);
    let (status, _) = h.lock(SessionId::generate(), &["A5"]).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_booking_payment_lifecycle() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();
    let (_, lock) = h.lock(session, &["D8"]).await;
    let (_, booking) = h.confirm(session, lock["lockId"].as_str().unwrap()).await;
    let booking_uri = format!("/bookings/{}", booking["bookingId"].as_str().unwrap());

    let (status, _) = h.send(Method::GET, &booking_uri, Some(SessionId::generate()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, fetched) = h.send(Method::GET, &booking_uri, Some(session), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["guest"]["email"], "k6_guest@loadtest.local");

    let (status, paid) = h
        .send(Method::POST, &format!("{}/pay", booking_uri), Some(session), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "CONFIRMED");

    let (status, _) = h
        .send(Method::POST, &format!("{}/cancel", booking_uri), Some(session), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_returns_seats_to_sale() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();
    let (_, lock) = h.lock(session, &["E2", "E3"]).await;
    let (_, booking) = h.confirm(session, lock["lockId"].as_str().unwrap()).await;
    assert_eq!(len_of(&h.availability().await, "bookedSeats"), 2);

    let uri = format!("/bookings/{}/cancel", booking["bookingId"].as_str().unwrap());
    let (status, cancelled) = h.send(Method::POST, &uri, Some(session), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");
    assert_eq!(len_of(&h.availability().await, "bookedSeats"), 0);

    assert_eq!(h.lock(SessionId::generate(), &["E2"]).await.0, StatusCode::CREATED);
}

#[tokio::test]
async fn test_seat_stream_endpoint() {
    let h = harness(chrono::Duration::seconds(300)).await;

    let request = Request::builder()
        .uri(format!("/seat-locks/stream/{}", h.showtime_id))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let (status, _) = h
        .send(Method::GET, &format!("/seat-locks/stream/{}", ShowtimeId::generate()), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_locking_another_showtime_releases_the_first() {
    let h = harness(chrono::Duration::seconds(300)).await;
    let session = SessionId::generate();
    let (status, first) = h.lock(session, &["C3"]).await;
    assert_eq!(status, StatusCode::CREATED);

    let other = h
        .state
        .catalog
        .showtimes()
        .map(|s| s.showtime_id)
        .find(|id| *id != h.showtime_id)
        .unwrap();
    let seat = h
        .state
        .catalog
        .seat_layout(other)
        .unwrap()
        .into_iter()
        .find(|s| s.label() == "C3")
        .unwrap();
    let body = json!({
        "showtimeId": other.to_string(),
        "seats": [{ "showtimeSeatId": seat.seat_id.to_string(), "ticketTypeId": h.adult.to_string() }]
    });
    let (status, _) = h.send(Method::POST, "/seat-locks", Some(session), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let availability = h.availability().await;
    assert_eq!(len_of(&availability, "lockedSeats"), 0);
    assert_eq!(len_of(&availability, "availableSeats"), 100);

    let (status, _) = h.confirm(session, first["lockId"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
