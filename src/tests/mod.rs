//! Scenario tests driving `Tileset::update` end-to-end against the fake
//! `Transport`/`ContentLoader` in `fixtures`, with no real I/O or sleeping.

mod fixtures;
