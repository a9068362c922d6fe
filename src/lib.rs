// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep dotfiles in a git repository, and symlinked into place.
//!
//! Updot tracks the paths listed in a manifest. Every tracked path lives in
//! the dotfiles repository, and the location it conventionally occupies in
//! the user's home directory becomes a symbolic link into that repository.
//! Real files found at a tracked location are moved into the repository, or
//! backed up when the repository already has a copy. Repository changes are
//! pulled from and pushed to a repository on the hosting service.

pub mod config;
pub mod doctor;
pub mod hosting;
pub mod identity;
pub mod manifest;
pub mod path;
pub mod prompt;
pub mod reconcile;
pub mod repo;
pub mod selfupdate;
pub mod ssh;
pub mod sync;
pub mod syscall;
