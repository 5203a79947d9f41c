//! Kalah board state and the pure move engine.
//!
//! The board is a ring of 14 cells.  Each player owns a row of six pits and
//! one store:
//!
//! ```text
//!          12  11  10   9   8   7          ← North row (sown right-to-left)
//!   [13]                          [6]
//!           0   1   2   3   4   5          ← South row (sown left-to-right)
//! ```
//!
//! Sowing walks the ring in increasing index order, wrapping at 14, and skips
//! the opponent's store.  The mirror of pit `i` (the pit directly across) is
//! `12 - i`.
//!
//! Nothing in this module touches sessions, lobbies, or the network: the
//! engine is a pure function of `(board, mover, pit)` so the lobby layer can
//! validate a move, inspect the outcome, and only then commit it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pits on each player's row.
pub const PITS_PER_ROW: usize = 6;

/// Total cells on the board: two rows plus two stores.
pub const BOARD_CELLS: usize = 2 * PITS_PER_ROW + 2;

/// Index of South's store.
pub const SOUTH_STORE: usize = PITS_PER_ROW;

/// Index of North's store.
pub const NORTH_STORE: usize = BOARD_CELLS - 1;

/// Stones placed in every pit when a game starts, unless configured otherwise.
pub const DEFAULT_STONES_PER_PIT: u8 = 4;

/// Largest seeding that keeps every cell representable as a single byte on
/// the wire (12 pits × 21 stones = 252).
pub const MAX_STONES_PER_PIT: u8 = 21;

// ── Seats ─────────────────────────────────────────────────────────────────────

/// One of the two playing sides.
///
/// The first player to join a lobby sits South and moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    South,
    North,
}

impl Seat {
    /// Returns the other seat.
    pub fn opponent(self) -> Seat {
        match self {
            Seat::South => Seat::North,
            Seat::North => Seat::South,
        }
    }

    /// Index of this seat's store.
    pub fn store(self) -> usize {
        match self {
            Seat::South => SOUTH_STORE,
            Seat::North => NORTH_STORE,
        }
    }

    /// Board indices of this seat's row pits, in sowing order.
    pub fn row(self) -> std::ops::Range<usize> {
        match self {
            Seat::South => 0..PITS_PER_ROW,
            Seat::North => PITS_PER_ROW + 1..NORTH_STORE,
        }
    }

    /// Returns `true` if `index` is one of this seat's row pits.
    pub fn owns_pit(self, index: usize) -> bool {
        self.row().contains(&index)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons a move is rejected.  A rejected move never mutates the board.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MoveError {
    /// The index is past the end of the board.
    #[error("pit {0} is out of range")]
    PitOutOfRange(u8),

    /// The index is a store or a pit on the opponent's row.
    #[error("pit {0} is not on your row")]
    NotOwnPit(u8),

    /// The chosen pit holds no stones.
    #[error("pit {0} is empty")]
    EmptyPit(u8),

    /// The seat asking to move does not hold the turn.
    #[error("it is not your turn")]
    NotYourTurn,

    /// The game already ended.
    #[error("the game is over")]
    GameOver,
}

// ── Board ─────────────────────────────────────────────────────────────────────

/// Stone counts for all 14 cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Board {
    cells: [u8; BOARD_CELLS],
}

impl Board {
    /// Creates a freshly seeded board with `stones_per_pit` stones in every
    /// pit and empty stores.
    ///
    /// Seeding is clamped to [`MAX_STONES_PER_PIT`].
    pub fn new(stones_per_pit: u8) -> Self {
        let stones = stones_per_pit.min(MAX_STONES_PER_PIT);
        let mut cells = [stones; BOARD_CELLS];
        cells[SOUTH_STORE] = 0;
        cells[NORTH_STORE] = 0;
        Self { cells }
    }

    /// Builds a board from raw cell counts, e.g. a decoded snapshot.
    pub fn from_cells(cells: [u8; BOARD_CELLS]) -> Self {
        Self { cells }
    }

    /// Raw cell counts in board order.
    pub fn cells(&self) -> &[u8; BOARD_CELLS] {
        &self.cells
    }

    /// Stone count at `index`, or `None` past the end of the board.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.cells.get(index).copied()
    }

    /// Stones in `seat`'s store.
    pub fn store(&self, seat: Seat) -> u8 {
        self.cells[seat.store()]
    }

    /// Sum of all pits and stores.
    pub fn total_stones(&self) -> u32 {
        self.cells.iter().map(|&c| u32::from(c)).sum()
    }

    /// Returns `true` if every pit on `seat`'s row is empty.
    pub fn row_is_empty(&self, seat: Seat) -> bool {
        seat.row().all(|i| self.cells[i] == 0)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_STONES_PER_PIT)
    }
}

// ── Move engine ───────────────────────────────────────────────────────────────

/// Final result of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    Winner(Seat),
    Draw,
}

/// Everything that follows from one legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Board after sowing, capture, and any end-of-game sweep.
    pub board: Board,
    /// Cell that received the last stone.
    pub last_cell: usize,
    /// Whether the capture rule fired.
    pub captured: bool,
    /// Whether the mover keeps the turn.
    pub extra_turn: bool,
    /// Set when the move emptied a row and ended the game.
    pub result: Option<GameResult>,
}

/// Applies `mover`'s move from `pit` to `board` and returns the outcome.
///
/// The input board is never modified; callers commit `outcome.board` only
/// when they accept the move.
///
/// # Errors
///
/// - [`MoveError::PitOutOfRange`] for indices past the end of the board.
/// - [`MoveError::NotOwnPit`] for stores and opponent pits.
/// - [`MoveError::EmptyPit`] for pits with no stones.
pub fn apply_move(board: &Board, mover: Seat, pit: u8) -> Result<MoveOutcome, MoveError> {
    let origin = usize::from(pit);
    if origin >= BOARD_CELLS {
        return Err(MoveError::PitOutOfRange(pit));
    }
    if !mover.owns_pit(origin) {
        return Err(MoveError::NotOwnPit(pit));
    }
    let stones = board.cells[origin];
    if stones == 0 {
        return Err(MoveError::EmptyPit(pit));
    }

    let mut cells = board.cells;
    let skipped_store = mover.opponent().store();
    cells[origin] = 0;

    let mut cursor = origin;
    let mut landed_in_empty = false;
    for _ in 0..stones {
        cursor = (cursor + 1) % BOARD_CELLS;
        if cursor == skipped_store {
            cursor = (cursor + 1) % BOARD_CELLS;
        }
        landed_in_empty = cells[cursor] == 0;
        cells[cursor] = cells[cursor].saturating_add(1);
    }

    let own_store = mover.store();
    let is_store = cursor == SOUTH_STORE || cursor == NORTH_STORE;

    let captured = !is_store && landed_in_empty;
    if captured {
        let mirror = 2 * PITS_PER_ROW - cursor;
        let haul = cells[cursor].saturating_add(cells[mirror]);
        cells[cursor] = 0;
        cells[mirror] = 0;
        cells[own_store] = cells[own_store].saturating_add(haul);
    }

    let extra_turn = cursor == own_store;

    let mut next = Board { cells };
    let result = sweep_if_finished(&mut next);

    Ok(MoveOutcome {
        board: next,
        last_cell: cursor,
        captured,
        extra_turn,
        result,
    })
}

/// Ends the game when either row is empty: the other row is swept into its
/// owner's store and the stores are compared.
fn sweep_if_finished(board: &mut Board) -> Option<GameResult> {
    if !board.row_is_empty(Seat::South) && !board.row_is_empty(Seat::North) {
        return None;
    }

    for seat in [Seat::South, Seat::North] {
        let swept = seat
            .row()
            .fold(0u8, |acc, i| acc.saturating_add(std::mem::take(&mut board.cells[i])));
        let store = seat.store();
        board.cells[store] = board.cells[store].saturating_add(swept);
    }

    let south = board.store(Seat::South);
    let north = board.store(Seat::North);
    Some(match south.cmp(&north) {
        std::cmp::Ordering::Greater => GameResult::Winner(Seat::South),
        std::cmp::Ordering::Less => GameResult::Winner(Seat::North),
        std::cmp::Ordering::Equal => GameResult::Draw,
    })
}

// ── Game ──────────────────────────────────────────────────────────────────────

/// A board plus whose turn it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    board: Board,
    to_move: Seat,
    result: Option<GameResult>,
}

impl Game {
    /// Starts a new game with South to move.
    pub fn new(stones_per_pit: u8) -> Self {
        Self {
            board: Board::new(stones_per_pit),
            to_move: Seat::South,
            result: None,
        }
    }

    /// Resumes a game from an existing position.
    pub fn from_position(board: Board, to_move: Seat) -> Self {
        Self {
            board,
            to_move,
            result: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// The seat holding the turn.
    pub fn to_move(&self) -> Seat {
        self.to_move
    }

    /// Set once a move has ended the game.
    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    /// Plays `seat`'s move from `pit` and commits it on success.
    ///
    /// # Errors
    ///
    /// [`MoveError::GameOver`] after the game ended, [`MoveError::NotYourTurn`]
    /// if `seat` is not to move, otherwise the errors of [`apply_move`].
    /// The game is unchanged on error.
    pub fn play(&mut self, seat: Seat, pit: u8) -> Result<MoveOutcome, MoveError> {
        if self.result.is_some() {
            return Err(MoveError::GameOver);
        }
        if seat != self.to_move {
            return Err(MoveError::NotYourTurn);
        }

        let outcome = apply_move(&self.board, seat, pit)?;
        self.board = outcome.board;
        self.result = outcome.result;
        if !outcome.extra_turn {
            self.to_move = seat.opponent();
        }
        Ok(outcome)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn board(cells: [u8; BOARD_CELLS]) -> Board {
        Board::from_cells(cells)
    }

    // ── Seeding ───────────────────────────────────────────────────────────────

    #[test]
    fn test_new_board_seeds_every_pit_and_leaves_stores_empty() {
        let b = Board::new(4);
        assert_eq!(b.store(Seat::South), 0);
        assert_eq!(b.store(Seat::North), 0);
        assert!(Seat::South.row().chain(Seat::North.row()).all(|i| b.cells()[i] == 4));
        assert_eq!(b.total_stones(), 48);
    }

    #[test]
    fn test_new_board_clamps_oversized_seeding() {
        let b = Board::new(200);
        assert_eq!(b.get(0), Some(MAX_STONES_PER_PIT));
    }

    #[test]
    fn test_seat_rows_and_stores_partition_the_board() {
        let mut seen = [false; BOARD_CELLS];
        for seat in [Seat::South, Seat::North] {
            for i in seat.row() {
                seen[i] = true;
            }
            seen[seat.store()] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(Seat::North.row(), 7..13);
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_apply_move_rejects_out_of_range_pit() {
        let b = Board::default();
        assert_eq!(apply_move(&b, Seat::South, 14), Err(MoveError::PitOutOfRange(14)));
        assert_eq!(apply_move(&b, Seat::South, 255), Err(MoveError::PitOutOfRange(255)));
    }

    #[test]
    fn test_apply_move_rejects_opponent_pit_and_stores() {
        let b = Board::default();
        assert_eq!(apply_move(&b, Seat::South, 7), Err(MoveError::NotOwnPit(7)));
        assert_eq!(apply_move(&b, Seat::South, 6), Err(MoveError::NotOwnPit(6)));
        assert_eq!(apply_move(&b, Seat::North, 3), Err(MoveError::NotOwnPit(3)));
        assert_eq!(apply_move(&b, Seat::North, 13), Err(MoveError::NotOwnPit(13)));
    }

    #[test]
    fn test_apply_move_rejects_empty_pit() {
        let mut cells = *Board::default().cells();
        cells[2] = 0;
        cells[SOUTH_STORE] = 4;
        assert_eq!(apply_move(&board(cells), Seat::South, 2), Err(MoveError::EmptyPit(2)));
    }

    // ── Sowing ────────────────────────────────────────────────────────────────

    #[test]
    fn test_sowing_from_pit_three_crosses_store_into_opponent_row() {
        // Arrange
        let b = Board::default();

        // Act
        let out = apply_move(&b, Seat::South, 3).unwrap();

        // Assert: 4 stones land in 4, 5, store, 7
        assert_eq!(out.board.cells(), &[4, 4, 4, 0, 5, 5, 1, 5, 4, 4, 4, 4, 4, 0]);
        assert_eq!(out.last_cell, 7);
        assert!(!out.captured);
        assert!(!out.extra_turn);
        assert_eq!(out.result, None);
    }

    #[test]
    fn test_last_stone_in_own_store_grants_extra_turn() {
        let out = apply_move(&Board::default(), Seat::South, 2).unwrap();
        assert_eq!(out.last_cell, SOUTH_STORE);
        assert!(out.extra_turn);
    }

    #[test]
    fn test_north_sowing_wraps_past_south_store() {
        // Arrange: North pit 12 holds 3 stones → 13 (own store), 0, 1
        let mut cells = [1u8; BOARD_CELLS];
        cells[SOUTH_STORE] = 0;
        cells[NORTH_STORE] = 0;
        cells[12] = 3;

        // Act
        let out = apply_move(&board(cells), Seat::North, 12).unwrap();

        // Assert
        assert_eq!(out.board.store(Seat::North), 1);
        assert_eq!(out.board.cells()[0], 2);
        assert_eq!(out.board.cells()[1], 2);
        assert_eq!(out.board.store(Seat::South), 0);
        assert_eq!(out.last_cell, 1);
    }

    #[test]
    fn test_sowing_skips_opponent_store() {
        // Arrange: South pit 5 holds 9 stones: 6, 7..=12, (skip 13), 0, 1
        let mut cells = [1u8; BOARD_CELLS];
        cells[SOUTH_STORE] = 0;
        cells[NORTH_STORE] = 0;
        cells[5] = 9;

        // Act
        let out = apply_move(&board(cells), Seat::South, 5).unwrap();

        // Assert
        assert_eq!(out.board.store(Seat::North), 0, "opponent store is never sown");
        assert_eq!(out.last_cell, 1);
        assert_eq!(out.board.store(Seat::South), 1);
    }

    #[test]
    fn test_full_lap_sows_back_into_origin_and_captures() {
        // Arrange: 13 stones from pit 0 visit every cell except North's store
        // and end in the (emptied) origin.
        let mut cells = [0u8; BOARD_CELLS];
        cells[0] = 13;
        cells[3] = 1;
        cells[12] = 2;

        // Act
        let out = apply_move(&board(cells), Seat::South, 0).unwrap();

        // Assert: origin was empty before the last stone → capture with mirror 12
        assert_eq!(out.last_cell, 0);
        assert!(out.captured);
        assert_eq!(out.board.cells()[0], 0);
        assert_eq!(out.board.cells()[12], 0);
        assert_eq!(out.board.total_stones(), 16);
    }

    // ── Capture ───────────────────────────────────────────────────────────────

    #[test]
    fn test_capture_moves_pit_and_mirror_into_movers_store() {
        // Arrange: South pit 1 has 2 stones → lands in empty pit 3; mirror is 9
        let mut cells = *Board::default().cells();
        cells[1] = 2;
        cells[3] = 0;
        cells[9] = 6;
        let before = board(cells);

        // Act
        let out = apply_move(&before, Seat::South, 1).unwrap();

        // Assert
        assert!(out.captured);
        assert_eq!(out.board.cells()[3], 0);
        assert_eq!(out.board.cells()[9], 0);
        assert_eq!(out.board.store(Seat::South), 7);
        assert_eq!(out.board.total_stones(), before.total_stones());
    }

    #[test]
    fn test_landing_in_occupied_pit_does_not_capture() {
        let out = apply_move(&Board::default(), Seat::South, 0).unwrap();
        assert!(!out.captured);
    }

    #[test]
    fn test_landing_in_own_store_is_never_a_capture() {
        let mut cells = [0u8; BOARD_CELLS];
        cells[5] = 1;
        cells[8] = 3;
        let out = apply_move(&board(cells), Seat::South, 5).unwrap();
        assert!(!out.captured);
        assert!(out.extra_turn);
    }

    // ── End of game ───────────────────────────────────────────────────────────

    #[test]
    fn test_emptying_own_row_sweeps_opponent_row_and_declares_winner() {
        // Arrange: South's last stone goes to its store; North still has 5 on the row
        let mut cells = [0u8; BOARD_CELLS];
        cells[5] = 1;
        cells[SOUTH_STORE] = 20;
        cells[8] = 2;
        cells[10] = 3;
        cells[NORTH_STORE] = 10;

        // Act
        let out = apply_move(&board(cells), Seat::South, 5).unwrap();

        // Assert
        assert_eq!(out.result, Some(GameResult::Winner(Seat::South)));
        assert_eq!(out.board.store(Seat::South), 21);
        assert_eq!(out.board.store(Seat::North), 15);
        assert!(out.board.row_is_empty(Seat::North));
    }

    #[test]
    fn test_equal_stores_at_end_is_a_draw() {
        let mut cells = [0u8; BOARD_CELLS];
        cells[5] = 1;
        cells[SOUTH_STORE] = 9;
        cells[7] = 4;
        cells[NORTH_STORE] = 6;
        let out = apply_move(&board(cells), Seat::South, 5).unwrap();
        assert_eq!(out.result, Some(GameResult::Draw));
    }

    // ── Game wrapper ──────────────────────────────────────────────────────────

    #[test]
    fn test_game_passes_turn_after_ordinary_move() {
        let mut game = Game::new(4);
        game.play(Seat::South, 3).unwrap();
        assert_eq!(game.to_move(), Seat::North);
    }

    #[test]
    fn test_game_keeps_turn_after_store_landing() {
        let mut game = Game::new(4);
        game.play(Seat::South, 2).unwrap();
        assert_eq!(game.to_move(), Seat::South);
    }

    #[test]
    fn test_game_rejects_out_of_turn_move_without_mutation() {
        let mut game = Game::new(4);
        let before = game.clone();
        assert_eq!(game.play(Seat::North, 8), Err(MoveError::NotYourTurn));
        assert_eq!(game, before);
    }

    #[test]
    fn test_game_rejects_moves_after_result() {
        let mut cells = [0u8; BOARD_CELLS];
        cells[5] = 1;
        cells[7] = 1;
        let mut game = Game::from_position(board(cells), Seat::South);
        game.play(Seat::South, 5).unwrap();
        assert!(game.result().is_some());
        assert_eq!(game.play(Seat::South, 0), Err(MoveError::GameOver));
    }
}
