// Dotrel
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Dotrel core engine
//!
//! Two independent subsystems make up the core:
//! - `transaction_engine`: strict two-phase-locking transaction execution over
//!   shared storage blocks, with a bounded worker pool and lifecycle events.
//! - `query`: rule-driven rewriting of linearized relational algebra
//!   expressions, currently the projection equivalence rules.

pub mod query;
pub mod transaction_engine;
