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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
pub const RACK_SIZE: usize = 7;
pub const BOARD_SIZE: usize = 15;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// A single letter tile. `'?'` is the blank.
pub type Tile = char;

/// Per-request outcome for everything a client can get wrong. None of these
/// are fatal to the game they occur in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameError {
    NotFound,
    GameFull,
    AlreadyStarted,
    NotStarted,
    NotEnoughPlayers,
    NotYourTurn,
    IllegalMove,
    InvalidTiles,
    RequestInFlight,
    Timeout,
}

impl GameError {
    pub fn message(&self) -> &'static str {
        match self {
            GameError::NotFound => "no game or player with that ID",
            GameError::GameFull => "maximum players reached for game",
            GameError::AlreadyStarted => "game has already started",
            GameError::NotStarted => "game has not started yet",
            GameError::NotEnoughPlayers => "at least two players needed to start game",
            GameError::NotYourTurn => "it is not this player's turn",
            GameError::IllegalMove => "tile placement is not legal",
            GameError::InvalidTiles => "requested tiles are not in the player's rack",
            GameError::RequestInFlight => "a previous request from this player is still pending",
            GameError::Timeout => "the game did not answer in time",
        }
    }
}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for GameError {}

/// A square on the board. Row 0 is the top edge, column 0 the left edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Coordinate {
    pub row: usize,
    pub col: usize,
}

/// The tile grid. Opaque to the registry, lobby, and turn controller; only
/// the board engine interprets its contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Board {
    pub cells: Vec<Vec<Option<Tile>>>,
}

impl Board {
    pub fn new() -> Self {
        Self {
            cells: vec![vec![None; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    pub fn in_bounds(&self, coord: Coordinate) -> bool {
        coord.row < self.cells.len() && coord.col < self.cells[coord.row].len()
    }

    pub fn cell(&self, coord: Coordinate) -> Option<Tile> {
        self.cells
            .get(coord.row)
            .and_then(|row| row.get(coord.col))
            .copied()
            .flatten()
    }

    pub fn set(&mut self, coord: Coordinate, tile: Tile) {
        if self.in_bounds(coord) {
            self.cells[coord.row][coord.col] = Some(tile);
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// Point value of a letter. Blanks score zero.
pub fn letter_value(tile: Tile) -> u32 {
    match tile.to_ascii_uppercase() {
        'A' | 'E' | 'I' | 'O' | 'U' | 'L' | 'N' | 'S' | 'T' | 'R' => 1,
        'D' | 'G' => 2,
        'B' | 'C' | 'M' | 'P' => 3,
        'F' | 'H' | 'V' | 'W' | 'Y' => 4,
        'K' => 5,
        'J' | 'X' => 8,
        'Q' | 'Z' => 10,
        _ => 0,
    }
}

/// The standard 100-tile English letter distribution, including two blanks.
/// Returned unshuffled; the tile pool shuffles at game start.
pub fn standard_tile_set() -> Vec<Tile> {
    const COUNTS: [(Tile, usize); 27] = [
        ('A', 9),
        ('B', 2),
        ('C', 2),
        ('D', 4),
        ('E', 12),
        ('F', 2),
        ('G', 3),
        ('H', 2),
        ('I', 9),
        ('J', 1),
        ('K', 1),
        ('L', 4),
        ('M', 2),
        ('N', 6),
        ('O', 8),
        ('P', 2),
        ('Q', 1),
        ('R', 6),
        ('S', 4),
        ('T', 6),
        ('U', 4),
        ('V', 2),
        ('W', 2),
        ('X', 1),
        ('Y', 2),
        ('Z', 1),
        ('?', 2),
    ];

    let mut tiles = Vec::with_capacity(100);
    for (tile, count) in COUNTS {
        tiles.extend(std::iter::repeat_n(tile, count));
    }
    tiles
}

/// Remove `tiles` from `rack`, respecting multiplicity. The rack is left
/// untouched when any requested tile is missing.
pub fn remove_tiles(rack: &mut Vec<Tile>, tiles: &[Tile]) -> bool {
    let mut remaining = rack.clone();
    for tile in tiles {
        match remaining.iter().position(|held| held == tile) {
            Some(idx) => {
                remaining.remove(idx);
            }
            None => return false,
        }
    }
    *rack = remaining;
    true
}

/// What every player may see about a seat. Rack contents are deliberately
/// absent; only the count crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerView {
    pub player_id: Uuid,
    pub name: String,
    pub number: usize,
    pub score: u32,
    pub tiles_held: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameResponse {
    pub game_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGameRequest {
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGameResponse {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGameResponse {
    pub game_id: Uuid,
    pub started: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateQuery {
    pub player_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    pub player_id: Uuid,
    pub start_pos: Coordinate,
    pub end_pos: Coordinate,
    pub tiles: Vec<Tile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub player_id: Uuid,
    pub tiles: Vec<Tile>,
}

/// The state view addressed to one player: the shared board and turn plus
/// that player's own rack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameStateResponse {
    pub game_id: Uuid,
    pub players: Vec<PlayerView>,
    pub board: Board,
    pub turn: usize,
    pub tiles: Vec<Tile>,
}
