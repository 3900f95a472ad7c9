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

//! Linearized token model of a relational algebra expression.
//!
//! An expression is an ordered token sequence: operator tokens carry a
//! single-character operator code, operand tokens a table name, and the
//! attribute-list / condition tokens the payload of the operator they follow.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of one expression token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// Relational operator, encoded as a single character
    Operator,
    /// Table name
    Operand,
    /// Delimited attribute list, payload of a projection or natural join
    Attributes,
    /// Condition string, payload of a selection or theta join
    Condition,
}

/// One token of a linearized expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn operator(code: OperatorCode) -> Self {
        Self {
            kind: TokenKind::Operator,
            text: code.as_char().to_string(),
        }
    }

    pub fn operand(table: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Operand,
            text: table.into(),
        }
    }

    pub fn attributes(list: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Attributes,
            text: list.into(),
        }
    }

    pub fn condition(condition: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Condition,
            text: condition.into(),
        }
    }

    /// Operator code of an operator token; `None` for other kinds and for
    /// unknown codes.
    pub fn operator_code(&self) -> Option<OperatorCode> {
        if self.kind != TokenKind::Operator {
            return None;
        }
        let mut chars = self.text.chars();
        let code = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        OperatorCode::from_char(code)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Operator => write!(f, "{}", self.text),
            TokenKind::Operand => write!(f, "({})", self.text),
            TokenKind::Attributes | TokenKind::Condition => write!(f, "[{}]", self.text),
        }
    }
}

/// Relational operators understood by the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCode {
    Projection,
    Selection,
    NaturalJoin,
    ThetaJoin,
    Union,
    Intersect,
    Except,
    Rename,
}

impl OperatorCode {
    pub fn from_char(code: char) -> Option<Self> {
        match code {
            'p' => Some(OperatorCode::Projection),
            's' => Some(OperatorCode::Selection),
            'n' => Some(OperatorCode::NaturalJoin),
            't' => Some(OperatorCode::ThetaJoin),
            'u' => Some(OperatorCode::Union),
            'i' => Some(OperatorCode::Intersect),
            'e' => Some(OperatorCode::Except),
            'r' => Some(OperatorCode::Rename),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            OperatorCode::Projection => 'p',
            OperatorCode::Selection => 's',
            OperatorCode::NaturalJoin => 'n',
            OperatorCode::ThetaJoin => 't',
            OperatorCode::Union => 'u',
            OperatorCode::Intersect => 'i',
            OperatorCode::Except => 'e',
            OperatorCode::Rename => 'r',
        }
    }
}

/// Render a token sequence as a single readable line, for logs and the CLI.
pub fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|token| token.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
