use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;
use ulid::Ulid;

use roombook::auth::{INVALID_CREDENTIALS, LOG_IN_FIRST, LOGGED_IN, StaticAuthenticator};
use roombook::engine::Engine;
use roombook::http::{AppState, SESSION_COOKIE, router};
use roombook::model::*;
use roombook::notify::MailQueue;
use roombook::render::JsonPresenter;
use roombook::repository::EngineRepository;
use roombook::session::InMemorySessions;
use roombook::workflow::{AVAILABILITY_LOST, AppContext};

// ── Test infrastructure ──────────────────────────────────────

struct TestApp {
    app: Router,
    engine: Arc<Engine>,
    cookie: Option<String>,
}

impl TestApp {
    fn new() -> Self {
        Self::build(false)
    }

    fn build(require_login: bool) -> Self {
        let dir = std::env::temp_dir().join(format!("roombook_http_test_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let engine = Arc::new(Engine::new(dir.join("roombook.wal")).unwrap());
        let (mail, _rx) = MailQueue::channel(16, "desk@roombook.test");
        let state = AppState {
            ctx: AppContext {
                repo: Arc::new(EngineRepository::new(engine.clone(), Duration::from_secs(3))),
                sessions: Arc::new(InMemorySessions::new(Duration::from_secs(600))),
                mail,
            },
            presenter: Arc::new(JsonPresenter),
            auth: Arc::new(StaticAuthenticator::new(STAFF, Some("hunter22".into()))),
            secure_cookies: false,
            require_login,
        };
        Self {
            app: router(state),
            engine,
            cookie: None,
        }
    }

    async fn send(&mut self, mut req: Request<Body>) -> Response {
        if let Some(cookie) = &self.cookie {
            req.headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }
        let resp = self.app.clone().oneshot(req).await.unwrap();
        if let Some(set) = resp.headers().get(header::SET_COOKIE) {
            let pair = set.to_str().unwrap().split(';').next().unwrap().to_string();
            self.cookie = Some(pair);
        }
        resp
    }

    async fn get(&mut self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_form(&mut self, uri: &str, body: &str) -> Response {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }
}

async fn json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(resp: &Response) -> &str {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

const AMY: &str = "first_name=Amy&last_name=Lee&email=a%40b.com&phone=555";
const STAFF: &str = "admin@roombook.test";
const STAFF_LOGIN: &str = "email=admin%40roombook.test&password=hunter22";

// ── Booking flow ─────────────────────────────────────────────

#[tokio::test]
async fn full_booking_over_http() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "Generals Quarters".into()).await.unwrap();

    let resp = t.post_form("/search-availability", "start=2024-03-10&end=2024-03-12").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(t.cookie.as_deref().unwrap().starts_with(SESSION_COOKIE));
    let body = json(resp).await;
    assert_eq!(body["view"], "choose-room");
    assert_eq!(body["data"]["rooms"][0]["id"], room.id.to_string());
    assert_eq!(body["string_map"]["start_date"], "2024-03-10");

    let resp = t.get(&format!("/choose-room/{}", room.id)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/make-reservation");

    let resp = t.get("/make-reservation").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["view"], "make-reservation");
    assert_eq!(body["data"]["reservation"]["room_name"], "Generals Quarters");

    let resp = t
        .post_form("/make-reservation", "first_name=Al&last_name=Lee&email=a%40b.com&phone=555")
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["view"], "make-reservation");
    assert_eq!(body["form"]["values"]["email"], "a@b.com");
    assert_eq!(
        body["form"]["errors"]["first_name"][0],
        "This field must be at least 3 characters long"
    );

    let resp = t.post_form("/make-reservation", AMY).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/reservation-summary");

    let resp = t.get("/reservation-summary").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["view"], "reservation-summary");
    assert_eq!(body["data"]["reservation"]["reservation"]["guest"]["first_name"], "Amy");
    assert_eq!(body["string_map"]["end_date"], "2024-03-12");

    let resp = t.get("/reservation-summary").await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&resp), "/");
    let body = json(t.get("/").await).await;
    assert_eq!(body["error"], "reservation not found in session");
}

#[tokio::test]
async fn no_availability_redirects_with_error() {
    let mut t = TestApp::new();
    let resp = t.post_form("/search-availability", "start=2024-03-10&end=2024-03-12").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/search-availability");

    let body = json(t.get("/search-availability").await).await;
    assert_eq!(body["error"], "No availability");
}

#[tokio::test]
async fn bad_dates_flag_the_field() {
    let mut t = TestApp::new();
    t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();

    let resp = t.post_form("/search-availability", "start=2024-03-12&end=2024-03-10").await;
    let body = json(resp).await;
    assert_eq!(body["view"], "search-availability");
    assert!(body["form"]["errors"]["end"][0].is_string());
    assert_eq!(body["form"]["values"]["start"], "2024-03-12");

    let resp = t.post_form("/search-availability", "start=03/10/2024&end=2024-03-12").await;
    let body = json(resp).await;
    assert!(body["form"]["errors"]["start"][0].is_string());
}

#[tokio::test]
async fn overlong_search_flags_the_end_date() {
    let mut t = TestApp::new();
    t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();

    let resp = t.post_form("/search-availability", "start=2024-01-01&end=2025-06-01").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["view"], "search-availability");
    assert!(body["form"]["errors"]["end"][0].as_str().unwrap().contains("stay too long"));
    assert!(body["form"]["errors"]["start"].is_null());
}

#[tokio::test]
async fn overlong_book_room_link_redirects_with_error() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();

    let resp = t.get(&format!("/book-room?id={}&s=2024-01-01&e=2025-06-01", room.id)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/search-availability");

    let body = json(t.get("/search-availability").await).await;
    assert!(body["error"].as_str().unwrap().contains("stay too long"));
    assert!(t.engine.list_reservations(ReservationFilter::All).is_empty());
}

#[tokio::test]
async fn lost_room_returns_to_room_choice() {
    let mut t = TestApp::new();
    let taken = t.engine.create_room(Ulid::new(), "Taken".into()).await.unwrap();
    let spare = t.engine.create_room(Ulid::new(), "Spare".into()).await.unwrap();

    t.post_form("/search-availability", "start=2024-03-10&end=2024-03-12").await;
    t.get(&format!("/choose-room/{}", taken.id)).await;
    let range = DateRange::parse("2024-03-10", "2024-03-12").unwrap();
    t.engine.place_reservation(Guest::default(), taken.id, range).await.unwrap();

    let resp = t.post_form("/make-reservation", AMY).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/choose-room");

    let resp = t.get("/choose-room").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["view"], "choose-room");
    assert_eq!(body["error"], AVAILABILITY_LOST);
    let rooms = body["data"]["rooms"].as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["id"], spare.id.to_string());
    assert_eq!(body["string_map"]["start_date"], "2024-03-10");

    let resp = t.get(&format!("/choose-room/{}", spare.id)).await;
    assert_eq!(location(&resp), "/make-reservation");
    let resp = t.post_form("/make-reservation", AMY).await;
    assert_eq!(location(&resp), "/reservation-summary");
}

#[tokio::test]
async fn choose_room_without_a_search_goes_back_to_search() {
    let mut t = TestApp::new();
    let resp = t.get("/choose-room").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/search-availability");
}

#[tokio::test]
async fn choosing_a_room_not_offered_is_refused() {
    let mut t = TestApp::new();
    t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();
    t.post_form("/search-availability", "start=2024-03-10&end=2024-03-12").await;

    let resp = t.get(&format!("/choose-room/{}", Ulid::new())).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/search-availability");

    let resp = t.get("/choose-room/not-a-ulid").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn availability_json() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();
    let range = DateRange::parse("2024-03-10", "2024-03-12").unwrap();
    t.engine.place_reservation(Guest::default(), room.id, range).await.unwrap();

    let free = json(
        t.post_form(
            "/search-availability-json",
            &format!("start=2024-03-12&end=2024-03-14&room_id={}", room.id),
        )
        .await,
    )
    .await;
    assert_eq!(free["ok"], true);

    let taken = json(
        t.post_form(
            "/search-availability-json",
            &format!("start=2024-03-11&end=2024-03-13&room_id={}", room.id),
        )
        .await,
    )
    .await;
    assert_eq!(taken["ok"], false);
    assert_eq!(taken["start_date"], "2024-03-11");

    let unknown = json(
        t.post_form("/search-availability-json", "start=2024-03-11&end=2024-03-13&room_id=nope")
            .await,
    )
    .await;
    assert_eq!(unknown["ok"], false);
}

#[tokio::test]
async fn book_room_link_skips_search() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();

    let resp = t.get(&format!("/book-room?id={}&s=2024-03-10&e=2024-03-12", room.id)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/make-reservation");

    let resp = t.post_form("/make-reservation", AMY).await;
    assert_eq!(location(&resp), "/reservation-summary");
}

// ── Login ────────────────────────────────────────────────────

#[tokio::test]
async fn login_and_logout_swap_the_session_cookie() {
    let mut t = TestApp::new();
    let body = json(t.get("/user/login").await).await;
    assert_eq!(body["view"], "login");
    assert_eq!(body["is_authenticated"], false);
    let anonymous = t.cookie.clone().unwrap();

    let resp = t.post_form("/user/login", STAFF_LOGIN).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/");
    let staff = t.cookie.clone().unwrap();
    assert_ne!(staff, anonymous);

    let body = json(t.get("/").await).await;
    assert_eq!(body["flash"], LOGGED_IN);
    assert_eq!(body["is_authenticated"], true);

    let resp = t.get("/user/logout").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/user/login");
    assert_ne!(t.cookie.as_deref(), Some(staff.as_str()));

    let body = json(t.get("/").await).await;
    assert_eq!(body["is_authenticated"], false);
}

#[tokio::test]
async fn bad_logins_are_refused() {
    let mut t = TestApp::new();

    let resp = t.post_form("/user/login", "email=admin%40roombook.test&password=nope").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/user/login");
    let body = json(t.get("/user/login").await).await;
    assert_eq!(body["error"], INVALID_CREDENTIALS);
    assert_eq!(body["is_authenticated"], false);

    let resp = t.post_form("/user/login", "email=nope&password=secret").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["view"], "login");
    assert!(body["form"]["errors"]["email"][0].is_string());
    assert_eq!(body["form"]["values"]["password"], "");
}

#[tokio::test]
async fn admin_pages_need_login_when_required() {
    let mut t = TestApp::build(true);

    let resp = t.get("/admin/reservations-new").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/user/login");
    let body = json(t.get("/user/login").await).await;
    assert_eq!(body["error"], LOG_IN_FIRST);

    let resp = t.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);

    t.post_form("/user/login", STAFF_LOGIN).await;
    let resp = t.get("/admin/reservations-new").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["view"], "admin-reservations");

    t.get("/user/logout").await;
    let resp = t.get("/admin/reservations-all").await;
    assert_eq!(location(&resp), "/user/login");
}

// ── Admin ────────────────────────────────────────────────────

#[tokio::test]
async fn admin_process_and_delete() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();
    let range = DateRange::parse("2024-03-10", "2024-03-12").unwrap();
    let id = t.engine.place_reservation(Guest::default(), room.id, range).await.unwrap();

    let body = json(t.get("/admin/reservations-new").await).await;
    assert_eq!(body["view"], "admin-reservations");
    assert_eq!(body["data"]["reservations"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["reservations"][0]["room_name"], "A");

    let resp = t.get(&format!("/admin/process-reservation/new/{id}")).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/admin/reservations-new");

    let body = json(t.get("/admin/reservations-new").await).await;
    assert_eq!(body["flash"], "Reservation marked as processed");
    assert!(body["data"]["reservations"].as_array().unwrap().is_empty());

    let resp = t.get(&format!("/admin/delete-reservation/all/{id}")).await;
    assert_eq!(location(&resp), "/admin/reservations-all");
    let body = json(t.get("/admin/reservations-all").await).await;
    assert_eq!(body["flash"], "Reservation deleted");
    assert!(body["data"]["reservations"].as_array().unwrap().is_empty());

    let resp = t.get(&format!("/admin/process-reservation/new/{id}")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_edit_reservation() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();
    let range = DateRange::parse("2024-03-10", "2024-03-12").unwrap();
    let id = t.engine.place_reservation(Guest::default(), room.id, range).await.unwrap();

    let body = json(t.get(&format!("/admin/reservations/all/{id}")).await).await;
    assert_eq!(body["view"], "admin-reservation-show");
    assert_eq!(body["string_map"]["src"], "all");

    let uri = format!("/admin/reservations/all/{id}");
    let resp = t.post_form(&uri, "first_name=Al&last_name=Lee&email=bad&phone=555").await;
    let body = json(resp).await;
    assert_eq!(body["view"], "admin-reservation-show");
    assert!(body["form"]["errors"]["email"][0].is_string());

    let resp = t.post_form(&uri, AMY).await;
    assert_eq!(location(&resp), "/admin/reservations-all");
    assert_eq!(t.engine.get_reservation(&id).unwrap().guest.first_name, "Amy");

    let resp = t.get(&format!("/admin/reservations/calendar/{id}")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = t.get(&format!("/admin/reservations/all/{}", Ulid::new())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_calendar_and_blocks() {
    let mut t = TestApp::new();
    let room = t.engine.create_room(Ulid::new(), "A".into()).await.unwrap();

    let resp = t
        .post_form(
            "/admin/block-room",
            &format!("room_id={}&start=2024-02-10&end=2024-02-12", room.id),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/admin/reservations-calendar?y=2024&m=2");

    let body = json(t.get("/admin/reservations-calendar?y=2024&m=2").await).await;
    assert_eq!(body["view"], "admin-reservations-calendar");
    assert_eq!(body["int_map"]["days_in_month"], 29);
    assert_eq!(body["string_map"]["last_month"], "01");
    assert_eq!(body["string_map"]["next_month"], "03");
    let blocks = &body["data"]["calendar"]["rooms"][0]["blocks"];
    assert_eq!(blocks.as_object().unwrap().len(), 29);
    let block_id = blocks["2024-02-10"].as_str().unwrap().to_string();
    assert!(blocks["2024-02-11"].is_null());

    let resp = t.get(&format!("/admin/remove-block/{block_id}")).await;
    assert_eq!(location(&resp), "/admin/reservations-calendar");
    let body = json(t.get("/admin/reservations-calendar?y=2024&m=2").await).await;
    assert!(body["data"]["calendar"]["rooms"][0]["blocks"]["2024-02-10"].is_null());

    let resp = t.get("/admin/reservations-calendar?y=2024&m=13").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
}
