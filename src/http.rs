//! axum routes over the booking workflow and admin operations.
//!
//! Recoverable outcomes (bad dates, invalid guest details, no availability)
//! are answered here with a redirect and a session message or a re-rendered
//! form. Storage failures become an opaque 500.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use thiserror::Error;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use ulid::Ulid;

use crate::admin::{self, AdminError};
use crate::auth::{self, AuthError, Authenticator, LoginForm};
use crate::forms::{Form, GuestForm, form_for};
use crate::model::*;
use crate::render::{Presenter, RenderError, TemplateData};
use crate::session::{Session, SessionToken};
use crate::workflow::{self, AppContext, AvailabilityCheck, SearchOutcome, WorkflowError};

pub const SESSION_COOKIE: &str = "roombook_session";

#[derive(Clone)]
pub struct AppState {
    pub ctx: AppContext,
    pub presenter: Arc<dyn Presenter>,
    pub auth: Arc<dyn Authenticator>,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
    /// Send anonymous visitors of `/admin` to the login page.
    pub require_login: bool,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error.message = %self, error.cause_chain = ?self, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}

type HttpResult = Result<Response, HttpError>;

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/reservations-new", get(admin_new_reservations))
        .route("/admin/reservations-all", get(admin_all_reservations))
        .route("/admin/reservations-calendar", get(admin_calendar))
        .route("/admin/reservations/{src}/{id}", get(admin_show).post(admin_update))
        .route("/admin/process-reservation/{src}/{id}", get(admin_process))
        .route("/admin/delete-reservation/{src}/{id}", get(admin_delete))
        .route("/admin/block-room", post(admin_block_room))
        .route("/admin/remove-block/{id}", get(admin_remove_block))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_login));

    Router::new()
        .route("/", get(home))
        .route("/search-availability", get(search_page).post(search))
        .route("/search-availability-json", post(search_json))
        .route("/choose-room", get(reoffer))
        .route("/choose-room/{id}", get(choose_room))
        .route("/book-room", get(book_room))
        .route("/make-reservation", get(reservation_form).post(submit_reservation))
        .route("/reservation-summary", get(reservation_summary))
        .route("/user/login", get(login_page).post(login))
        .route("/user/logout", get(logout))
        .merge(admin)
        .layer(middleware::from_fn_with_state(state.clone(), session_cookie))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

/// Attach the session token to the request, issuing a cookie for new visitors.
/// A handler that switched tokens sets its own cookie.
async fn session_cookie(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let existing = req
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| value.parse::<Ulid>().ok());
    let token: SessionToken = existing.unwrap_or_else(Ulid::new);
    req.extensions_mut().insert(token);

    let mut response = next.run(req).await;
    if existing.is_none() && !response.headers().contains_key(header::SET_COOKIE) {
        set_session_cookie(&state, &mut response, token);
    }
    response
}

fn set_session_cookie(state: &AppState, response: &mut Response, token: SessionToken) {
    let secure = if state.secure_cookies { "; Secure" } else { "" };
    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax{secure}");
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
}

/// Turn anonymous visitors away from the admin pages when login is required.
async fn require_login(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    req: Request,
    next: Next,
) -> Response {
    let session = state.ctx.session(token);
    if state.require_login && !session.is_authenticated() {
        tracing::debug!(path = %req.uri().path(), "admin page needs login");
        session.put_error(auth::LOG_IN_FIRST);
        return see_other("/user/login");
    }
    next.run(req).await
}

fn page(state: &AppState, session: &Session<'_>, view: &str, data: TemplateData) -> HttpResult {
    let data = data.with_messages(session);
    let body = state.presenter.render(view, &data)?;
    Ok(([(header::CONTENT_TYPE, state.presenter.content_type())], body).into_response())
}

fn see_other(uri: &str) -> Response {
    Redirect::to(uri).into_response()
}

fn not_found() -> HttpResult {
    Ok(StatusCode::NOT_FOUND.into_response())
}

fn fmt_date(day: chrono::NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

// ── Booking flow ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DateInput {
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
}

/// The date form re-displayed with the offending field flagged.
fn date_form(input: &DateInput, err: &DateError) -> Form {
    let mut form = Form::new([("start", input.start.as_str()), ("end", input.end.as_str())]);
    let field = match err {
        DateError::InvalidFormat(raw) if *raw == input.start => "start",
        _ => "end",
    };
    form.add_error(field, err.to_string());
    form
}

async fn home(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    let session = state.ctx.session(token);
    page(&state, &session, "home", TemplateData::default())
}

async fn search_page(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    let session = state.ctx.session(token);
    page(&state, &session, "search-availability", TemplateData::default())
}

async fn search(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    axum::Form(input): axum::Form<DateInput>,
) -> HttpResult {
    let session = state.ctx.session(token);
    match workflow::search(&state.ctx, token, &input.start, &input.end).await {
        Ok(SearchOutcome::RoomsOffered { range, rooms }) => {
            let data = TemplateData::default()
                .data("rooms", &rooms)?
                .string("start_date", fmt_date(range.start()))
                .string("end_date", fmt_date(range.end()));
            page(&state, &session, "choose-room", data)
        }
        Ok(SearchOutcome::NoAvailability { .. }) => Ok(see_other("/search-availability")),
        Err(WorkflowError::InvalidRange(e)) => {
            tracing::debug!("rejected search: {e}");
            let form = date_form(&input, &e);
            page(&state, &session, "search-availability", TemplateData::default().form(form))
        }
        Err(e) => Err(e.into()),
    }
}

/// The room list again for the dates already chosen, after the picked room
/// was lost.
async fn reoffer(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    let session = state.ctx.session(token);
    match workflow::reoffer(&state.ctx, token).await {
        Ok(SearchOutcome::RoomsOffered { range, rooms }) => {
            let data = TemplateData::default()
                .data("rooms", &rooms)?
                .string("start_date", fmt_date(range.start()))
                .string("end_date", fmt_date(range.end()));
            page(&state, &session, "choose-room", data)
        }
        Ok(SearchOutcome::NoAvailability { .. }) | Err(WorkflowError::MissingDraft) => {
            Ok(see_other("/search-availability"))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityInput {
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
    #[serde(default)]
    room_id: String,
}

async fn search_json(
    State(state): State<AppState>,
    axum::Form(input): axum::Form<AvailabilityInput>,
) -> HttpResult {
    let unavailable = |message: String| AvailabilityCheck {
        ok: false,
        message,
        room_id: input.room_id.clone(),
        start_date: input.start.clone(),
        end_date: input.end.clone(),
    };
    let Ok(room_id) = input.room_id.parse::<Ulid>() else {
        return Ok(Json(unavailable(format!("unknown room {:?}", input.room_id))).into_response());
    };
    match workflow::check_availability(&state.ctx, room_id, &input.start, &input.end).await {
        Ok(check) => Ok(Json(check).into_response()),
        Err(e) if !e.is_server_error() => Ok(Json(unavailable(e.to_string())).into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn choose_room(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Path(id): Path<String>,
) -> HttpResult {
    let Ok(room_id) = id.parse::<Ulid>() else {
        return not_found();
    };
    let session = state.ctx.session(token);
    match workflow::choose_room(&state.ctx, token, room_id).await {
        Ok(_) => Ok(see_other("/make-reservation")),
        Err(WorkflowError::MissingDraft) => {
            session.put_error(workflow::MISSING_CONFIRMATION);
            Ok(see_other("/"))
        }
        Err(e @ (WorkflowError::RoomNotOffered(_) | WorkflowError::RoomNotFound(_))) => {
            tracing::debug!("rejected room choice: {e}");
            session.put_error(e.to_string());
            Ok(see_other("/search-availability"))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct BookRoomQuery {
    id: String,
    s: String,
    e: String,
}

async fn book_room(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Query(query): Query<BookRoomQuery>,
) -> HttpResult {
    let Ok(room_id) = query.id.parse::<Ulid>() else {
        return not_found();
    };
    let session = state.ctx.session(token);
    match workflow::book_room(&state.ctx, token, room_id, &query.s, &query.e).await {
        Ok(_) => Ok(see_other("/make-reservation")),
        Err(e @ (WorkflowError::InvalidRange(_) | WorkflowError::RoomNotFound(_))) => {
            tracing::debug!("rejected booking link: {e}");
            session.put_error(e.to_string());
            Ok(see_other("/search-availability"))
        }
        Err(e) => Err(e.into()),
    }
}

fn reservation_page(
    state: &AppState,
    session: &Session<'_>,
    draft: &crate::session::ReservationDraft,
    form: Form,
) -> HttpResult {
    let mut data = TemplateData::default().data("reservation", draft)?.form(form);
    if let Some(range) = draft.range {
        data = data
            .string("start_date", fmt_date(range.start()))
            .string("end_date", fmt_date(range.end()));
    }
    page(state, session, "make-reservation", data)
}

async fn reservation_form(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    let session = state.ctx.session(token);
    match workflow::reservation_form(&state.ctx, token).await {
        Ok((draft, form)) => reservation_page(&state, &session, &draft, form),
        Err(WorkflowError::MissingDraft) => {
            session.put_error(workflow::MISSING_CONFIRMATION);
            Ok(see_other("/"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn submit_reservation(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    axum::Form(input): axum::Form<GuestForm>,
) -> HttpResult {
    let session = state.ctx.session(token);
    match workflow::submit_details(&state.ctx, token, &input).await {
        Ok(_) => Ok(see_other("/reservation-summary")),
        Err(WorkflowError::Validation(form)) => {
            let draft = session.draft().unwrap_or_default();
            reservation_page(&state, &session, &draft, form)
        }
        Err(WorkflowError::AvailabilityLost { .. }) => Ok(see_other("/choose-room")),
        Err(WorkflowError::MissingDraft) => {
            session.put_error(workflow::MISSING_CONFIRMATION);
            Ok(see_other("/"))
        }
        Err(e @ WorkflowError::RoomNotFound(_)) => {
            session.put_error(e.to_string());
            Ok(see_other("/search-availability"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn reservation_summary(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    let session = state.ctx.session(token);
    match workflow::reservation_summary(&state.ctx, token).await {
        Ok(confirmation) => {
            let range = confirmation.reservation.range;
            let data = TemplateData::default()
                .data("reservation", &confirmation)?
                .string("start_date", fmt_date(range.start()))
                .string("end_date", fmt_date(range.end()));
            page(&state, &session, "reservation-summary", data)
        }
        Err(WorkflowError::MissingConfirmation) => Ok(Redirect::temporary("/").into_response()),
        Err(e) => Err(e.into()),
    }
}

// ── Login ───────────────────────────────────────────────────────

async fn login_page(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    let session = state.ctx.session(token);
    let form = Form::new([("email", "")]);
    page(&state, &session, "login", TemplateData::default().form(form))
}

async fn login(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    axum::Form(input): axum::Form<LoginForm>,
) -> HttpResult {
    match auth::login(&state.ctx, state.auth.as_ref(), token, &input).await {
        Ok(renewed) => {
            let mut response = see_other("/");
            set_session_cookie(&state, &mut response, renewed);
            Ok(response)
        }
        Err(AuthError::Validation(form)) => {
            let session = state.ctx.session(token);
            page(&state, &session, "login", TemplateData::default().form(form))
        }
        Err(AuthError::InvalidCredentials) => Ok(see_other("/user/login")),
    }
}

async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> Response {
    let fresh = auth::logout(&state.ctx, token);
    let mut response = see_other("/user/login");
    set_session_cookie(&state, &mut response, fresh);
    response
}

// ── Admin ───────────────────────────────────────────────────────

fn admin_failure(err: AdminError) -> HttpResult {
    match err {
        AdminError::NotFound(id) => {
            tracing::debug!(%id, "admin target not found");
            not_found()
        }
        other => Err(other.into()),
    }
}

fn listing_uri(filter: ReservationFilter) -> &'static str {
    match filter {
        ReservationFilter::All => "/admin/reservations-all",
        ReservationFilter::Unprocessed => "/admin/reservations-new",
    }
}

fn calendar_uri(day: chrono::NaiveDate) -> String {
    format!("/admin/reservations-calendar?y={}&m={}", day.year(), day.month())
}

async fn admin_list(
    state: AppState,
    token: SessionToken,
    filter: ReservationFilter,
    src: &str,
) -> HttpResult {
    let session = state.ctx.session(token);
    match admin::list_reservations(&state.ctx, filter).await {
        Ok(rows) => {
            let data = TemplateData::default()
                .data("reservations", &rows)?
                .string("src", src);
            page(&state, &session, "admin-reservations", data)
        }
        Err(e) => admin_failure(e),
    }
}

async fn admin_new_reservations(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    admin_list(state, token, ReservationFilter::Unprocessed, "new").await
}

async fn admin_all_reservations(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> HttpResult {
    admin_list(state, token, ReservationFilter::All, "all").await
}

#[derive(Debug, Deserialize)]
struct CalendarQuery {
    y: Option<i32>,
    m: Option<u32>,
}

async fn admin_calendar(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Query(query): Query<CalendarQuery>,
) -> HttpResult {
    let today = Utc::now().date_naive();
    let (year, month) = (query.y.unwrap_or(today.year()), query.m.unwrap_or(today.month()));
    let session = state.ctx.session(token);
    match admin::calendar(&state.ctx, year, month).await {
        Ok(view) => {
            let (prev_year, prev_month) = view.previous;
            let (next_year, next_month) = view.next;
            let data = TemplateData::default()
                .int("days_in_month", i64::from(view.days_in_month))
                .string("this_month", format!("{month:02}"))
                .string("this_month_year", year.to_string())
                .string("last_month", format!("{prev_month:02}"))
                .string("last_month_year", prev_year.to_string())
                .string("next_month", format!("{next_month:02}"))
                .string("next_month_year", next_year.to_string())
                .data("calendar", &view)?;
            page(&state, &session, "admin-reservations-calendar", data)
        }
        Err(AdminError::InvalidRange(e)) => {
            tracing::debug!("rejected calendar month: {e}");
            session.put_error(e.to_string());
            Ok(see_other("/admin/reservations-calendar"))
        }
        Err(e) => admin_failure(e),
    }
}

/// Parse `{src}/{id}` path segments; `None` means 404.
fn admin_target(src: &str, id: &str) -> Option<(ReservationFilter, ReservationId)> {
    Some((ReservationFilter::from_src(src)?, id.parse().ok()?))
}

async fn admin_show(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Path((src, id)): Path<(String, String)>,
) -> HttpResult {
    let Some((_, id)) = admin_target(&src, &id) else {
        return not_found();
    };
    let session = state.ctx.session(token);
    match admin::show_reservation(&state.ctx, id).await {
        Ok(row) => {
            let form = form_for(&row.reservation.guest);
            show_page(&state, &session, &row, &src, form)
        }
        Err(e) => admin_failure(e),
    }
}

fn show_page(
    state: &AppState,
    session: &Session<'_>,
    row: &admin::ReservationRow,
    src: &str,
    form: Form,
) -> HttpResult {
    let data = TemplateData::default()
        .data("reservation", row)?
        .string("src", src)
        .form(form);
    page(state, session, "admin-reservation-show", data)
}

async fn admin_update(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Path((src, id)): Path<(String, String)>,
    axum::Form(input): axum::Form<GuestForm>,
) -> HttpResult {
    let Some((filter, id)) = admin_target(&src, &id) else {
        return not_found();
    };
    let session = state.ctx.session(token);
    match admin::update_reservation(&state.ctx, token, id, &input).await {
        Ok(()) => Ok(see_other(listing_uri(filter))),
        Err(AdminError::Validation(form)) => match admin::show_reservation(&state.ctx, id).await {
            Ok(row) => show_page(&state, &session, &row, &src, form),
            Err(e) => admin_failure(e),
        },
        Err(e) => admin_failure(e),
    }
}

async fn admin_process(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Path((src, id)): Path<(String, String)>,
) -> HttpResult {
    let Some((filter, id)) = admin_target(&src, &id) else {
        return not_found();
    };
    match admin::process_reservation(&state.ctx, token, id).await {
        Ok(()) => Ok(see_other(listing_uri(filter))),
        Err(e) => admin_failure(e),
    }
}

async fn admin_delete(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Path((src, id)): Path<(String, String)>,
) -> HttpResult {
    let Some((filter, id)) = admin_target(&src, &id) else {
        return not_found();
    };
    match admin::delete_reservation(&state.ctx, token, id).await {
        Ok(()) => Ok(see_other(listing_uri(filter))),
        Err(e) => admin_failure(e),
    }
}

#[derive(Debug, Deserialize)]
struct BlockInput {
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
}

async fn admin_block_room(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    axum::Form(input): axum::Form<BlockInput>,
) -> HttpResult {
    let Ok(room_id) = input.room_id.parse::<Ulid>() else {
        return not_found();
    };
    match admin::block_room(&state.ctx, token, room_id, &input.start, &input.end).await {
        Ok(_) => match parse_date(&input.start) {
            Ok(start) => Ok(see_other(&calendar_uri(start))),
            Err(_) => Ok(see_other("/admin/reservations-calendar")),
        },
        Err(AdminError::InvalidRange(e)) => {
            tracing::debug!("rejected block: {e}");
            state.ctx.session(token).put_error(e.to_string());
            Ok(see_other("/admin/reservations-calendar"))
        }
        Err(e) => admin_failure(e),
    }
}

async fn admin_remove_block(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    Path(id): Path<String>,
) -> HttpResult {
    let Ok(id) = id.parse::<Ulid>() else {
        return not_found();
    };
    match admin::remove_block(&state.ctx, token, id).await {
        Ok(()) => Ok(see_other("/admin/reservations-calendar")),
        Err(e) => admin_failure(e),
    }
}
