//! Dealing card rows for a new session.

use pairsync_protocol::{CardRow, SessionId};
use rand::Rng;
use rand::seq::SliceRandom;

/// Career names used for card faces.
pub const CAREERS: [&str; 26] = [
    "Architect",
    "Astronaut",
    "Baker",
    "Biologist",
    "Carpenter",
    "Chef",
    "Dentist",
    "Designer",
    "Electrician",
    "Engineer",
    "Farmer",
    "Firefighter",
    "Geologist",
    "Journalist",
    "Lawyer",
    "Librarian",
    "Mechanic",
    "Musician",
    "Nurse",
    "Pharmacist",
    "Photographer",
    "Pilot",
    "Plumber",
    "Programmer",
    "Translator",
    "Veterinarian",
];

fn career_name(index: usize) -> String {
    let base = CAREERS[index % CAREERS.len()];
    match index / CAREERS.len() {
        0 => base.to_string(),
        round => format!("{base} {}", round + 1),
    }
}

/// Deals `pair_count` pairs in random order.
pub fn deal(session_id: SessionId, pair_count: usize) -> Vec<CardRow> {
    deal_with(session_id, pair_count, &mut rand::rng())
}

/// Deals `pair_count` pairs shuffled with the given RNG.
pub fn deal_with<R: Rng + ?Sized>(
    session_id: SessionId,
    pair_count: usize,
    rng: &mut R,
) -> Vec<CardRow> {
    let mut names: Vec<String> = (0..pair_count)
        .flat_map(|i| {
            let name = career_name(i);
            [name.clone(), name]
        })
        .collect();
    names.shuffle(rng);
    into_rows(session_id, names)
}

/// Deals `pair_count` pairs with each pair side by side: positions `2k` and
/// `2k + 1` share a face. Useful for scripted games.
pub fn deal_ordered(session_id: SessionId, pair_count: usize) -> Vec<CardRow> {
    let names = (0..pair_count)
        .flat_map(|i| {
            let name = career_name(i);
            [name.clone(), name]
        })
        .collect();
    into_rows(session_id, names)
}

fn into_rows(session_id: SessionId, names: Vec<String>) -> Vec<CardRow> {
    names
        .into_iter()
        .zip(0u32..)
        .map(|(name, position)| CardRow::face_down(session_id, position, name))
        .collect()
}
