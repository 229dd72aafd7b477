// Copyright 2023 Remi Bernotavicius

//! The shared catalog recipes draw from: ingredients with their measurement units, and tags.

pub mod ingredients;
pub mod tags;
