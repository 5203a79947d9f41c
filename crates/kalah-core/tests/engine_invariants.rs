//! Whole-game checks for the Kalah rules.
//!
//! A deterministic "first legal pit" strategy plays complete games from a
//! few seedings; the tests assert properties that must hold after every move.

use kalah_core::{Board, Game, GameResult, MoveError, Seat, BOARD_CELLS};

/// First non-empty pit on `seat`'s row, or `None` if the row is empty.
fn first_legal_pit(board: &Board, seat: Seat) -> Option<u8> {
    seat.row()
        .find(|&i| board.get(i).unwrap_or(0) > 0)
        .map(|i| i as u8)
}

/// Last non-empty pit on `seat`'s row.
fn last_legal_pit(board: &Board, seat: Seat) -> Option<u8> {
    seat.row()
        .rev()
        .find(|&i| board.get(i).unwrap_or(0) > 0)
        .map(|i| i as u8)
}

fn play_out(stones: u8, pick: fn(&Board, Seat) -> Option<u8>) -> (Game, usize) {
    let mut game = Game::new(stones);
    let total = game.board().total_stones();
    let mut moves = 0;

    while game.result().is_none() {
        let seat = game.to_move();
        let pit = pick(game.board(), seat).expect("side to move must have a legal pit");
        game.play(seat, pit).expect("chosen pit must be legal");
        moves += 1;

        assert_eq!(
            game.board().total_stones(),
            total,
            "stones must be conserved after move {moves}"
        );
        assert!(moves < 10_000, "game did not terminate");
    }
    (game, moves)
}

#[test]
fn test_stones_are_conserved_through_complete_games() {
    for stones in [1, 3, 4, 6] {
        play_out(stones, first_legal_pit);
        play_out(stones, last_legal_pit);
    }
}

#[test]
fn test_finished_game_has_empty_rows_and_matching_result() {
    let (game, _) = play_out(4, first_legal_pit);
    let board = game.board();

    for seat in [Seat::South, Seat::North] {
        assert!(board.row_is_empty(seat), "{seat:?} row must be swept");
    }
    assert_eq!(
        u32::from(board.store(Seat::South)) + u32::from(board.store(Seat::North)),
        board.total_stones()
    );

    let expected = match board.store(Seat::South).cmp(&board.store(Seat::North)) {
        std::cmp::Ordering::Greater => GameResult::Winner(Seat::South),
        std::cmp::Ordering::Less => GameResult::Winner(Seat::North),
        std::cmp::Ordering::Equal => GameResult::Draw,
    };
    assert_eq!(game.result(), Some(expected));
}

#[test]
fn test_no_moves_accepted_after_game_over() {
    let (mut game, _) = play_out(3, first_legal_pit);
    let before = game.clone();

    for pit in 0..BOARD_CELLS as u8 {
        assert_eq!(game.play(game.to_move(), pit), Err(MoveError::GameOver));
    }
    assert_eq!(game, before);
}

#[test]
fn test_rejected_moves_never_change_turn_or_board() {
    // Arrange
    let mut game = Game::new(4);
    let before = game.clone();

    // Act + Assert: stores, opponent pits, out-of-range and wrong seat
    assert_eq!(game.play(Seat::South, 6), Err(MoveError::NotOwnPit(6)));
    assert_eq!(game.play(Seat::South, 13), Err(MoveError::NotOwnPit(13)));
    assert_eq!(game.play(Seat::South, 9), Err(MoveError::NotOwnPit(9)));
    assert_eq!(game.play(Seat::South, 14), Err(MoveError::PitOutOfRange(14)));
    assert_eq!(game.play(Seat::North, 7), Err(MoveError::NotYourTurn));
    assert_eq!(game, before);
}

#[test]
fn test_empty_pit_is_rejected_after_it_was_played() {
    let mut game = Game::new(4);
    game.play(Seat::South, 0).expect("opening move");
    game.play(Seat::North, 7).expect("reply");

    assert_eq!(game.play(Seat::South, 0), Err(MoveError::EmptyPit(0)));
    assert_eq!(game.to_move(), Seat::South);
}
