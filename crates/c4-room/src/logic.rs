//! The Connect Four board: move application, win/draw detection, and
//! recovery serialization.
//!
//! This is the "Game Engine" of the specification, kept deliberately
//! free of any knowledge of sessions, sockets, or the registry — it is
//! a pure value type a room drives. There is no back-reference to a
//! server or dispatcher (the teacher's `Connect4` held a raw `Server*`
//! for exactly this purpose); outcomes are returned as data and the
//! caller decides who gets told what.

use std::fmt;

/// Board height.
pub const ROWS: usize = 6;
/// Board width.
pub const COLS: usize = 7;
/// Length of a winning run.
const WIN_LEN: usize = 4;

/// Which of the two players occupies a cell, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Empty,
    A,
    B,
}

/// The two participants of a game, in move order (`A` moves first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    A,
    B,
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Player::A => write!(f, "A"),
            Player::B => write!(f, "B"),
        }
    }
}

/// A coordinate on the board, `(row, col)`, row 0 at the top.
pub type Coord = (u8, u8);

/// Outcome of a single [`Engine::drop_piece`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// The column is full; no piece was placed.
    ColumnFull,
    /// The piece landed and the game continues. Carries the landing
    /// coordinate so the caller can announce the move.
    Continue { row: u8, col: u8 },
    /// The piece landed and completed a winning run.
    Win {
        row: u8,
        col: u8,
        winner: Player,
        winning_cells: [Coord; WIN_LEN],
    },
    /// The piece landed, filled the board, and nobody won.
    Draw { row: u8, col: u8 },
}

/// One Connect Four board plus whose turn it is.
///
/// Row/column/diagonal "lines" are precomputed once at construction, in
/// scan order (rows, then columns, then the `nw-se` diagonal family,
/// then the `sw-ne` diagonal family) so that win detection always
/// favors the earliest-scanned line and the earliest index within it —
/// this tie-break is part of the spec, not an implementation detail.
#[derive(Debug, Clone)]
pub struct Engine {
    board: [[Cell; COLS]; ROWS],
    a_to_move: bool,
    lines: Vec<Vec<(usize, usize)>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an empty board with `Player::A` to move first.
    pub fn new() -> Self {
        Self {
            board: [[Cell::Empty; COLS]; ROWS],
            a_to_move: true,
            lines: precompute_lines(),
        }
    }

    /// Whose turn it currently is.
    pub fn to_move(&self) -> Player {
        if self.a_to_move {
            Player::A
        } else {
            Player::B
        }
    }

    /// Drops the current mover's piece into `col` (0-indexed from the
    /// left).
    ///
    /// The caller is responsible for checking that it is actually the
    /// claimed player's turn before calling this — the engine only
    /// tracks *whose* turn it is, not who the caller claims to be,
    /// since that identity check is a room-level transient error
    /// (spec §4.4: wrong turn does not mutate engine state).
    pub fn drop_piece(&mut self, col: u8) -> DropOutcome {
        let col = col as usize;
        if self.board[0][col] != Cell::Empty {
            return DropOutcome::ColumnFull;
        }

        let mut row = 0usize;
        while row + 1 < ROWS && self.board[row + 1][col] == Cell::Empty {
            row += 1;
        }

        let mover = self.to_move();
        self.board[row][col] = match mover {
            Player::A => Cell::A,
            Player::B => Cell::B,
        };

        let (row_u8, col_u8) = (row as u8, col as u8);

        if let Some(winning_cells) = self.scan_for_win() {
            return DropOutcome::Win { row: row_u8, col: col_u8, winner: mover, winning_cells };
        }

        if self.is_full() {
            return DropOutcome::Draw { row: row_u8, col: col_u8 };
        }

        self.a_to_move = !self.a_to_move;
        DropOutcome::Continue { row: row_u8, col: col_u8 }
    }

    /// Scans every precomputed line, in order, for the first run of
    /// four identical non-empty cells. Mirrors the original engine's
    /// `getWinningTiles`: a run resets whenever a cell is empty or
    /// differs from its predecessor, and the *first* time a run hits
    /// four, those four cells (not the whole run) are returned.
    fn scan_for_win(&self) -> Option<[Coord; WIN_LEN]> {
        for line in &self.lines {
            if line.len() < WIN_LEN {
                continue;
            }
            let mut run = 0usize;
            for (i, &(r, c)) in line.iter().enumerate() {
                let cell = self.board[r][c];
                if i == 0 {
                    run = if cell != Cell::Empty { 1 } else { 0 };
                } else if cell == Cell::Empty {
                    run = 0;
                } else {
                    let (pr, pc) = line[i - 1];
                    if cell != self.board[pr][pc] {
                        run = 1;
                    } else {
                        run += 1;
                    }
                }
                if run == WIN_LEN {
                    let mut out = [(0u8, 0u8); WIN_LEN];
                    for (k, slot) in out.iter_mut().enumerate() {
                        let (r, c) = line[i - (WIN_LEN - 1) + k];
                        *slot = (r as u8, c as u8);
                    }
                    return Some(out);
                }
            }
        }
        None
    }

    fn is_full(&self) -> bool {
        (0..COLS).all(|c| self.board[0][c] != Cell::Empty)
    }

    /// Renders the board row-major, space-separated, `0`/`1`/`2` for
    /// empty/`A`/`B`, for `GAME_RECOVERY` on reconnect.
    pub fn serialize_for_recovery(&self) -> String {
        let mut cells = Vec::with_capacity(ROWS * COLS);
        for row in &self.board {
            for cell in row {
                cells.push(match cell {
                    Cell::Empty => "0",
                    Cell::A => "1",
                    Cell::B => "2",
                });
            }
        }
        cells.join(" ")
    }

    /// Reconstructs a board from a [`Self::serialize_for_recovery`]
    /// string. Test-only: production code only ever serializes a live
    /// board, it never deserializes one.
    #[cfg(test)]
    fn from_recovery(s: &str, a_to_move: bool) -> Self {
        let mut engine = Self::new();
        for (i, tok) in s.split(' ').enumerate() {
            let r = i / COLS;
            let c = i % COLS;
            engine.board[r][c] = match tok {
                "1" => Cell::A,
                "2" => Cell::B,
                _ => Cell::Empty,
            };
        }
        engine.a_to_move = a_to_move;
        engine
    }

    /// Columns that are not yet full — used by the round-trip test.
    #[cfg(test)]
    fn legal_columns(&self) -> Vec<u8> {
        (0..COLS as u8).filter(|&c| self.board[0][c as usize] == Cell::Empty).collect()
    }
}

fn precompute_lines() -> Vec<Vec<(usize, usize)>> {
    let mut lines = Vec::new();

    for r in 0..ROWS {
        lines.push((0..COLS).map(|c| (r, c)).collect());
    }
    for c in 0..COLS {
        // Bottom-to-top so a vertical win's cells come out rooted at the
        // piece that completed it, per spec.md §8 scenario 2's literal
        // `GAME_WINNING_TAILS` frame (decreasing row).
        lines.push((0..ROWS).rev().map(|r| (r, c)).collect());
    }

    // "nw-se" family: following the original's `storeDiagonal1` walk
    // (decreasing row, increasing column).
    for start in 0..(ROWS + COLS) {
        if start == ROWS {
            continue;
        }
        let (mut r, mut c) = if start < ROWS {
            (start as isize, 0isize)
        } else {
            (ROWS as isize - 1, start as isize - ROWS as isize)
        };
        let mut diag = Vec::new();
        while r != -1 && c != COLS as isize {
            diag.push((r as usize, c as usize));
            r -= 1;
            c += 1;
        }
        lines.push(diag);
    }

    // "sw-ne" family: following `storeDiagonal2` (increasing row,
    // increasing column).
    for start in 0..(ROWS + COLS) {
        if start == ROWS {
            continue;
        }
        let (mut r, mut c) = if start < ROWS {
            (ROWS as isize - start as isize - 1, 0isize)
        } else {
            (0isize, start as isize - ROWS as isize)
        };
        let mut diag = Vec::new();
        while r != ROWS as isize && c != COLS as isize {
            diag.push((r as usize, c as usize));
            r += 1;
            c += 1;
        }
        lines.push(diag);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertical_win_matches_spec_scenario() {
        let mut engine = Engine::new();
        for col in [3, 4, 3, 4, 3, 4] {
            let outcome = engine.drop_piece(col);
            assert!(matches!(outcome, DropOutcome::Continue { .. }));
        }
        let outcome = engine.drop_piece(3);
        match outcome {
            DropOutcome::Win { winner, winning_cells, row, col } => {
                assert_eq!(winner, Player::A);
                assert_eq!(row, 2);
                assert_eq!(col, 3);
                assert_eq!(winning_cells, [(5, 3), (4, 3), (3, 3), (2, 3)]);
            }
            other => panic!("expected a win, got {other:?}"),
        }
    }

    #[test]
    fn test_column_full_rejected() {
        let mut engine = Engine::new();
        for col in [0, 1, 0, 1, 0, 1, 0, 1] {
            engine.drop_piece(col);
        }
        let outcome = engine.drop_piece(0);
        assert_eq!(outcome, DropOutcome::ColumnFull);
    }

    #[test]
    fn test_horizontal_win() {
        let mut engine = Engine::new();
        for (a, b) in [(0, 0), (1, 1), (2, 2)] {
            engine.drop_piece(a);
            engine.drop_piece(b);
        }
        let outcome = engine.drop_piece(3);
        match outcome {
            DropOutcome::Win { winner, .. } => assert_eq!(winner, Player::A),
            other => panic!("expected a win, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_round_trip_preserves_legal_moves() {
        let mut engine = Engine::new();
        for col in [3, 2, 3, 2] {
            let outcome = engine.drop_piece(col);
            assert!(matches!(outcome, DropOutcome::Continue { .. }));
        }
        let serialized = engine.serialize_for_recovery();
        let reloaded = Engine::from_recovery(&serialized, engine.a_to_move);
        assert_eq!(engine.legal_columns(), reloaded.legal_columns());
        assert_eq!(serialized, reloaded.serialize_for_recovery());
    }

    #[test]
    fn test_to_move_alternates() {
        let mut engine = Engine::new();
        assert_eq!(engine.to_move(), Player::A);
        engine.drop_piece(0);
        assert_eq!(engine.to_move(), Player::B);
    }
}
