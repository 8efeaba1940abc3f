// Copyright (C) 2026 Wordtile
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc, oneshot};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;
use wordtile_common::{
    Board, Coordinate, CreateGameResponse, DEFAULT_REQUEST_TIMEOUT_SECONDS, GameError,
    GameStateQuery, GameStateResponse, JoinGameRequest, JoinGameResponse, MAX_PLAYERS,
    MIN_PLAYERS, PlayRequest, PlayerView, RACK_SIZE, StartGameResponse, SwapRequest, Tile,
    letter_value, remove_tiles, standard_tile_set,
};

const MAILBOX_CAPACITY: usize = 32;

#[derive(Clone)]
struct AppState {
    registry: Arc<GameRegistry>,
    engine: Arc<dyn BoardEngine>,
    tile_pools: Arc<dyn TilePoolFactory>,
    request_timeout: Duration,
}

/// Placement legality and scoring. The turn controller treats the board as
/// an opaque value and delegates every play to this seam.
#[async_trait]
trait BoardEngine: Send + Sync {
    async fn try_place(
        &self,
        board: &Board,
        start_pos: Coordinate,
        end_pos: Coordinate,
        tiles: &[Tile],
    ) -> Result<(Board, u32), GameError>;
}

/// Per-game source of replacement tiles. Owned exclusively by the turn
/// controller once the game starts.
trait TilePool: Send {
    /// Draw up to `n` tiles, bounded by remaining supply.
    fn draw(&mut self, n: usize) -> Vec<Tile>;
    /// Trade the given tiles for fresh ones. The handed-back tiles rejoin
    /// the supply before the redraw, so the trade always completes.
    fn exchange(&mut self, tiles: &[Tile]) -> Vec<Tile>;
}

trait TilePoolFactory: Send + Sync {
    fn create(&self) -> Box<dyn TilePool>;
}

/// Straight-line placement over the shared grid. Tiles fill the empty cells
/// of the span in order; cells already holding a letter are read through and
/// still score. Word validity is out of scope here.
struct GridBoardEngine;

impl GridBoardEngine {
    fn span_cells(start_pos: Coordinate, end_pos: Coordinate) -> Option<Vec<Coordinate>> {
        if start_pos.row == end_pos.row && start_pos.col <= end_pos.col {
            Some(
                (start_pos.col..=end_pos.col)
                    .map(|col| Coordinate {
                        row: start_pos.row,
                        col,
                    })
                    .collect(),
            )
        } else if start_pos.col == end_pos.col && start_pos.row <= end_pos.row {
            Some(
                (start_pos.row..=end_pos.row)
                    .map(|row| Coordinate {
                        row,
                        col: start_pos.col,
                    })
                    .collect(),
            )
        } else {
            None
        }
    }
}

#[async_trait]
impl BoardEngine for GridBoardEngine {
    async fn try_place(
        &self,
        board: &Board,
        start_pos: Coordinate,
        end_pos: Coordinate,
        tiles: &[Tile],
    ) -> Result<(Board, u32), GameError> {
        if tiles.is_empty() || !board.in_bounds(start_pos) || !board.in_bounds(end_pos) {
            return Err(GameError::IllegalMove);
        }

        let span = Self::span_cells(start_pos, end_pos).ok_or(GameError::IllegalMove)?;
        if span.len() < tiles.len() {
            return Err(GameError::IllegalMove);
        }

        let mut next_board = board.clone();
        let mut queue = tiles.iter();
        let mut points = 0;
        let mut placed = 0;

        for coord in span {
            let letter = match next_board.cell(coord) {
                Some(existing) => existing,
                None => match queue.next() {
                    Some(&tile) => {
                        next_board.set(coord, tile);
                        placed += 1;
                        tile
                    }
                    // An empty cell inside the span with no tile left for it.
                    None => return Err(GameError::IllegalMove),
                },
            };
            points += letter_value(letter);
        }

        // Every listed tile must land on the board, and at least one must.
        if queue.next().is_some() || placed == 0 {
            return Err(GameError::IllegalMove);
        }

        Ok((next_board, points))
    }
}

/// The standard 100-tile bag, shuffled at creation.
struct LetterBag {
    tiles: Vec<Tile>,
}

impl LetterBag {
    fn shuffled() -> Self {
        let mut tiles = standard_tile_set();
        tiles.shuffle(&mut rand::rng());
        Self { tiles }
    }
}

impl TilePool for LetterBag {
    fn draw(&mut self, n: usize) -> Vec<Tile> {
        let take = n.min(self.tiles.len());
        self.tiles.split_off(self.tiles.len() - take)
    }

    fn exchange(&mut self, tiles: &[Tile]) -> Vec<Tile> {
        let n = tiles.len();
        self.tiles.extend_from_slice(tiles);
        self.tiles.shuffle(&mut rand::rng());
        self.draw(n)
    }
}

struct LetterBagFactory;

impl TilePoolFactory for LetterBagFactory {
    fn create(&self) -> Box<dyn TilePool> {
        Box::new(LetterBag::shuffled())
    }
}

/// Process-wide map of games. The lock guards only map access; no game-level
/// operation runs under it.
#[derive(Default)]
struct GameRegistry {
    games: RwLock<HashMap<Uuid, Arc<Game>>>,
}

impl GameRegistry {
    async fn create_game(&self) -> Arc<Game> {
        let game = Arc::new(Game::new());
        let mut games = self.games.write().await;
        games.insert(game.id, game.clone());
        game
    }

    async fn lookup(&self, game_id: Uuid) -> Result<Arc<Game>, GameError> {
        let games = self.games.read().await;
        games.get(&game_id).cloned().ok_or(GameError::NotFound)
    }
}

/// One playthrough. The phase enum is the lobby gate: joining and starting
/// mutate under the phase lock, and the lobby-to-active transition swaps the
/// variant exactly once, handing all turn state to the controller task.
struct Game {
    id: Uuid,
    created_at: DateTime<Utc>,
    phase: Mutex<GamePhase>,
}

enum GamePhase {
    Lobby(LobbyState),
    Active(ActiveHandle),
}

#[derive(Default)]
struct LobbyState {
    players: Vec<LobbyPlayer>,
}

struct LobbyPlayer {
    id: Uuid,
    name: String,
    number: usize,
}

/// What remains visible of an active game outside its controller: the
/// mailbox sender and one single-permit gate per player enforcing at most
/// one outstanding request each.
struct ActiveHandle {
    mailbox: mpsc::Sender<TurnRequest>,
    gates: HashMap<Uuid, Arc<Semaphore>>,
}

struct TurnRequest {
    player_id: Uuid,
    action: TurnAction,
    reply: oneshot::Sender<Result<GameStateResponse, GameError>>,
}

enum TurnAction {
    Query,
    Play {
        start_pos: Coordinate,
        end_pos: Coordinate,
        tiles: Vec<Tile>,
    },
    Swap {
        tiles: Vec<Tile>,
    },
}

impl Game {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            phase: Mutex::new(GamePhase::Lobby(LobbyState::default())),
        }
    }

    /// Add a player while the game is still in the lobby. Join order becomes
    /// the turn rotation order.
    async fn join(&self, name: &str) -> Result<(Uuid, usize), GameError> {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            GamePhase::Active(_) => Err(GameError::AlreadyStarted),
            GamePhase::Lobby(lobby) => {
                if lobby.players.len() >= MAX_PLAYERS {
                    return Err(GameError::GameFull);
                }
                let player = LobbyPlayer {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    number: lobby.players.len(),
                };
                let (player_id, number) = (player.id, player.number);
                lobby.players.push(player);
                Ok((player_id, number))
            }
        }
    }

    /// Transition the game to its active phase: deal the starting racks,
    /// spawn the turn controller with sole ownership of the turn state, and
    /// leave behind only the mailbox handle. Atomic under the phase lock.
    async fn start(
        &self,
        engine: Arc<dyn BoardEngine>,
        tile_pools: &dyn TilePoolFactory,
    ) -> Result<DateTime<Utc>, GameError> {
        let mut phase = self.phase.lock().await;
        let lobby = match &mut *phase {
            GamePhase::Active(_) => return Err(GameError::AlreadyStarted),
            GamePhase::Lobby(lobby) => {
                if lobby.players.len() < MIN_PLAYERS {
                    return Err(GameError::NotEnoughPlayers);
                }
                std::mem::take(lobby)
            }
        };

        let mut pool = tile_pools.create();
        let seats: Vec<Seat> = lobby
            .players
            .into_iter()
            .map(|player| Seat {
                id: player.id,
                name: player.name,
                number: player.number,
                rack: pool.draw(RACK_SIZE),
                score: 0,
            })
            .collect();

        let gates = seats
            .iter()
            .map(|seat| (seat.id, Arc::new(Semaphore::new(1))))
            .collect();

        let (mailbox, requests) = mpsc::channel(MAILBOX_CAPACITY);
        let controller = TurnController {
            game_id: self.id,
            seats,
            board: Board::new(),
            turn_index: 0,
            pool,
            engine,
            requests,
        };
        tokio::spawn(controller.run());

        *phase = GamePhase::Active(ActiveHandle { mailbox, gates });
        Ok(Utc::now())
    }

    /// Enqueue a request for the turn controller and wait for the reply
    /// addressed to this player. The phase lock is held only long enough to
    /// clone the mailbox sender and the player's in-flight gate.
    async fn submit(
        &self,
        player_id: Uuid,
        action: TurnAction,
        request_timeout: Duration,
    ) -> Result<GameStateResponse, GameError> {
        let (mailbox, gate) = {
            let phase = self.phase.lock().await;
            match &*phase {
                GamePhase::Lobby(_) => return Err(GameError::NotStarted),
                GamePhase::Active(handle) => {
                    let gate = handle
                        .gates
                        .get(&player_id)
                        .ok_or(GameError::NotFound)?
                        .clone();
                    (handle.mailbox.clone(), gate)
                }
            }
        };

        let _permit = gate
            .try_acquire()
            .map_err(|_| GameError::RequestInFlight)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = TurnRequest {
            player_id,
            action,
            reply: reply_tx,
        };
        if mailbox.send(request).await.is_err() {
            warn!(game_id = %self.id, %player_id, "turn controller mailbox closed");
            return Err(GameError::Timeout);
        }

        match tokio::time::timeout(request_timeout, reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                warn!(game_id = %self.id, %player_id, "turn controller dropped a reply");
                Err(GameError::Timeout)
            }
            Err(_) => {
                warn!(game_id = %self.id, %player_id, "request timed out awaiting the turn controller");
                Err(GameError::Timeout)
            }
        }
    }
}

struct Seat {
    id: Uuid,
    name: String,
    number: usize,
    rack: Vec<Tile>,
    score: u32,
}

/// The single long-lived owner of an active game's turn state. Requests are
/// serviced strictly one at a time in mailbox order, which is what makes the
/// active phase race-free without any locking in here.
struct TurnController {
    game_id: Uuid,
    seats: Vec<Seat>,
    board: Board,
    turn_index: usize,
    pool: Box<dyn TilePool>,
    engine: Arc<dyn BoardEngine>,
    requests: mpsc::Receiver<TurnRequest>,
}

impl TurnController {
    async fn run(mut self) {
        info!(
            game_id = %self.game_id,
            players = self.seats.len(),
            "turn controller running"
        );
        while let Some(request) = self.requests.recv().await {
            let player_id = request.player_id;
            let response = self.handle(player_id, request.action).await;
            if request.reply.send(response).is_err() {
                // The submitting caller gave up (timeout or disconnect).
                warn!(
                    game_id = %self.game_id,
                    %player_id,
                    "reply receiver dropped before delivery"
                );
            }
        }
        info!(game_id = %self.game_id, "turn controller stopped");
    }

    async fn handle(
        &mut self,
        player_id: Uuid,
        action: TurnAction,
    ) -> Result<GameStateResponse, GameError> {
        let seat_idx = self
            .seats
            .iter()
            .position(|seat| seat.id == player_id)
            .ok_or(GameError::NotFound)?;

        match action {
            TurnAction::Query => Ok(self.state_for(seat_idx)),
            TurnAction::Play {
                start_pos,
                end_pos,
                tiles,
            } => self.handle_play(seat_idx, start_pos, end_pos, &tiles).await,
            TurnAction::Swap { tiles } => self.handle_swap(seat_idx, &tiles),
        }
    }

    async fn handle_play(
        &mut self,
        seat_idx: usize,
        start_pos: Coordinate,
        end_pos: Coordinate,
        tiles: &[Tile],
    ) -> Result<GameStateResponse, GameError> {
        if self.seats[seat_idx].number != self.turn_index {
            return Err(GameError::NotYourTurn);
        }
        if tiles.is_empty() {
            return Err(GameError::InvalidTiles);
        }

        // The rack must hold every played tile before the engine runs, so a
        // rejection here leaves board and turn untouched.
        let mut rack = self.seats[seat_idx].rack.clone();
        if !remove_tiles(&mut rack, tiles) {
            return Err(GameError::InvalidTiles);
        }

        let (board, points) = self
            .engine
            .try_place(&self.board, start_pos, end_pos, tiles)
            .await?;

        rack.extend(self.pool.draw(RACK_SIZE.saturating_sub(rack.len())));
        self.seats[seat_idx].rack = rack;
        self.seats[seat_idx].score += points;
        self.board = board;
        self.advance_turn();

        info!(
            game_id = %self.game_id,
            player_id = %self.seats[seat_idx].id,
            points,
            turn = self.turn_index,
            "play accepted"
        );
        Ok(self.state_for(seat_idx))
    }

    fn handle_swap(
        &mut self,
        seat_idx: usize,
        tiles: &[Tile],
    ) -> Result<GameStateResponse, GameError> {
        if self.seats[seat_idx].number != self.turn_index {
            return Err(GameError::NotYourTurn);
        }
        if tiles.is_empty() {
            return Err(GameError::InvalidTiles);
        }

        let mut rack = self.seats[seat_idx].rack.clone();
        if !remove_tiles(&mut rack, tiles) {
            return Err(GameError::InvalidTiles);
        }

        rack.extend(self.pool.exchange(tiles));
        self.seats[seat_idx].rack = rack;
        self.advance_turn();

        info!(
            game_id = %self.game_id,
            player_id = %self.seats[seat_idx].id,
            swapped = tiles.len(),
            turn = self.turn_index,
            "swap accepted"
        );
        Ok(self.state_for(seat_idx))
    }

    fn advance_turn(&mut self) {
        self.turn_index = (self.turn_index + 1) % self.seats.len();
    }

    /// Build the state view addressed to one seat. Other seats expose only
    /// their tile count.
    fn state_for(&self, seat_idx: usize) -> GameStateResponse {
        GameStateResponse {
            game_id: self.game_id,
            players: self
                .seats
                .iter()
                .map(|seat| PlayerView {
                    player_id: seat.id,
                    name: seat.name.clone(),
                    number: seat.number,
                    score: seat.score,
                    tiles_held: seat.rack.len(),
                })
                .collect(),
            board: self.board.clone(),
            turn: self.turn_index,
            tiles: self.seats[seat_idx].rack.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "word_game_service=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState {
        registry: Arc::new(GameRegistry::default()),
        engine: Arc::new(GridBoardEngine),
        tile_pools: Arc::new(LetterBagFactory),
        request_timeout: request_timeout_from_env(),
    };

    let app = build_router(state);

    let bind_addr = parse_bind_addr("WORD_GAME_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "word-game-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/games", post(create_game_handler))
        .route("/v1/games/{game_id}/join", post(join_game_handler))
        .route("/v1/games/{game_id}/start", post(start_game_handler))
        .route("/v1/games/{game_id}/state", get(game_state_handler))
        .route("/v1/games/{game_id}/play", post(play_handler))
        .route("/v1/games/{game_id}/swap", post(swap_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

fn request_timeout_from_env() -> Duration {
    let seconds = std::env::var("REQUEST_TIMEOUT_SECONDS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
        .max(1);
    Duration::from_secs(seconds)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "word-game-service"}))
}

async fn create_game_handler(
    State(state): State<AppState>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let game = state.registry.create_game().await;
    info!(game_id = %game.id, "created game");
    Ok(Json(CreateGameResponse {
        game_id: game.id,
        created_at: game.created_at,
    }))
}

async fn join_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
    Json(request): Json<JoinGameRequest>,
) -> Result<Json<JoinGameResponse>, ApiError> {
    let name = request.player_name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("player_name must not be empty"));
    }

    let game = state.registry.lookup(game_id).await?;
    let (player_id, number) = game.join(name).await?;
    info!(%game_id, %player_id, number, name, "player joined");
    Ok(Json(JoinGameResponse {
        game_id,
        player_id,
        number,
    }))
}

async fn start_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<StartGameResponse>, ApiError> {
    let game = state.registry.lookup(game_id).await?;
    let started_at = game
        .start(state.engine.clone(), state.tile_pools.as_ref())
        .await?;
    info!(%game_id, %started_at, "game started");
    Ok(Json(StartGameResponse {
        game_id,
        started: true,
        started_at,
    }))
}

async fn game_state_handler(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
    Query(query): Query<GameStateQuery>,
) -> Result<Json<GameStateResponse>, ApiError> {
    let game = state.registry.lookup(game_id).await?;
    let response = game
        .submit(query.player_id, TurnAction::Query, state.request_timeout)
        .await?;
    Ok(Json(response))
}

async fn play_handler(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
    Json(request): Json<PlayRequest>,
) -> Result<Json<GameStateResponse>, ApiError> {
    let game = state.registry.lookup(game_id).await?;
    let response = game
        .submit(
            request.player_id,
            TurnAction::Play {
                start_pos: request.start_pos,
                end_pos: request.end_pos,
                tiles: request.tiles,
            },
            state.request_timeout,
        )
        .await?;
    Ok(Json(response))
}

async fn swap_handler(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
    Json(request): Json<SwapRequest>,
) -> Result<Json<GameStateResponse>, ApiError> {
    let game = state.registry.lookup(game_id).await?;
    let response = game
        .submit(
            request.player_id,
            TurnAction::Swap {
                tiles: request.tiles,
            },
            state.request_timeout,
        )
        .await?;
    Ok(Json(response))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<GameError> for ApiError {
    fn from(error: GameError) -> Self {
        let status = match error {
            GameError::NotFound => StatusCode::NOT_FOUND,
            GameError::RequestInFlight => StatusCode::CONFLICT,
            GameError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
