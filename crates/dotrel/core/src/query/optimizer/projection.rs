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

//! Projection equivalence rewriting.
//!
//! A single forward pass over the linearized expression, emitting into a
//! scratch output list; each operator rule consults the already-emitted
//! suffix. The applied equivalences:
//!
//! - cascading projections: `π[L1](π[L2](R)) = π[L1](R)` when `L1 ⊆ L2`;
//! - commuting selection with projection: `π[L](σ[C](R)) = σ[C](π[L](R))`
//!   when `C` only references attributes of `L`;
//! - distributing projection over union and intersection:
//!   `π[L](R ∪ S) = π[L](R) ∪ π[L](S)`;
//! - splitting projection over a theta join: `π[L](R ⋈_C S)` becomes
//!   `π[L_R](R) ⋈_C π[L_S](S)` when `C` only references attributes of `L`,
//!   and otherwise keeps the outer projection over per-side projections
//!   augmented with the join attributes.
//!
//! The rewrite is best-effort and total: unknown operator codes and subtrees
//! whose schema cannot be resolved are emitted unchanged, never an error.

use tracing::debug;

use super::attributes::{
    RewriteConfig, SchemaProvider, condition_attributes, dedup, filter_to_schema, is_subset, join,
    tokenize,
};
use super::expression::{OperatorCode, Token, TokenKind};

pub struct ProjectionRewrite<'a> {
    catalog: &'a dyn SchemaProvider,
    config: RewriteConfig,
}

impl<'a> ProjectionRewrite<'a> {
    pub fn new(catalog: &'a dyn SchemaProvider) -> Self {
        Self::with_config(catalog, RewriteConfig::default())
    }

    pub fn with_config(catalog: &'a dyn SchemaProvider, config: RewriteConfig) -> Self {
        Self { catalog, config }
    }

    /// Rewrite one expression. The input is left untouched; the returned
    /// sequence is equivalent under the documented rules.
    pub fn rewrite(&self, input: &[Token]) -> Vec<Token> {
        let mut output: Vec<Token> = Vec::with_capacity(input.len());
        let mut index = 0;

        while index < input.len() {
            let token = &input[index];
            let consumed = match token.kind {
                TokenKind::Operator => self.apply_operator(token, input.get(index + 1), &mut output),
                // Operands and stray payload tokens pass through unchanged.
                TokenKind::Operand | TokenKind::Attributes | TokenKind::Condition => {
                    output.push(token.clone());
                    1
                }
            };
            index += consumed;
        }

        output
    }

    fn apply_operator(
        &self,
        operator: &Token,
        next: Option<&Token>,
        output: &mut Vec<Token>,
    ) -> usize {
        match operator.operator_code() {
            Some(OperatorCode::Projection) => self.apply_projection(operator, next, output),
            Some(OperatorCode::Selection) => self.apply_selection(operator, next, output),
            Some(OperatorCode::Union) | Some(OperatorCode::Intersect) => {
                self.distribute_over_set_operator(output);
                output.push(operator.clone());
                1
            }
            Some(OperatorCode::ThetaJoin) => self.apply_theta_join(operator, next, output),
            Some(OperatorCode::NaturalJoin) => {
                // Emitted unchanged together with its payload.
                output.push(operator.clone());
                match next {
                    Some(payload)
                        if matches!(payload.kind, TokenKind::Attributes | TokenKind::Condition) =>
                    {
                        output.push(payload.clone());
                        2
                    }
                    _ => 1,
                }
            }
            Some(OperatorCode::Except) | Some(OperatorCode::Rename) => {
                output.push(operator.clone());
                1
            }
            None => {
                debug!(operator = %operator.text, "unknown operator code, emitted unchanged");
                output.push(operator.clone());
                1
            }
        }
    }

    /// Cascading projections: when the most recently emitted token is the
    /// attribute list of an outer projection that is a subset of the incoming
    /// list, the incoming (inner) projection is redundant.
    fn apply_projection(
        &self,
        operator: &Token,
        next: Option<&Token>,
        output: &mut Vec<Token>,
    ) -> usize {
        let Some(attrs) = next.filter(|t| t.kind == TokenKind::Attributes) else {
            output.push(operator.clone());
            return 1;
        };

        if let Some(last) = output.last()
            && last.kind == TokenKind::Attributes
        {
            let outer = tokenize(&last.text, &self.config);
            let inner = tokenize(&attrs.text, &self.config);
            if is_subset(&outer, &inner) {
                debug!(outer = %last.text, inner = %attrs.text, "cascading projections, inner list dropped");
                return 2;
            }
        }

        output.push(operator.clone());
        output.push(attrs.clone());
        2
    }

    /// Commuting selection with projection: when the emitted suffix ends in a
    /// projection whose attribute list retains every attribute the condition
    /// references, the selection slides below that projection.
    fn apply_selection(
        &self,
        operator: &Token,
        next: Option<&Token>,
        output: &mut Vec<Token>,
    ) -> usize {
        let Some(condition) = next.filter(|t| t.kind == TokenKind::Condition) else {
            output.push(operator.clone());
            return 1;
        };

        if let Some((attrs_pos, _)) = trailing_projection(output) {
            let retained = tokenize(&output[attrs_pos].text, &self.config);
            let referenced = condition_attributes(&condition.text, &self.config);
            if is_subset(&referenced, &retained) {
                debug!(condition = %condition.text, projection = %output[attrs_pos].text, "selection commuted below projection");
                output.insert(attrs_pos - 1, condition.clone());
                output.insert(attrs_pos - 1, operator.clone());
                return 2;
            }
        }

        output.push(operator.clone());
        output.push(condition.clone());
        2
    }

    /// Distributing projection over union/intersection: a projection sitting
    /// above both operands is duplicated beneath each of them, so the set
    /// operator combines already-projected inputs.
    fn distribute_over_set_operator(&self, output: &mut Vec<Token>) {
        let Some((attrs_pos, operands)) = trailing_projection(output) else {
            return;
        };
        if operands < 2 {
            return;
        }

        let operator = output[attrs_pos - 1].clone();
        let attrs = output[attrs_pos].clone();
        if let Some(first_operand) =
            (attrs_pos + 1..output.len()).find(|&pos| output[pos].kind == TokenKind::Operand)
        {
            debug!(projection = %attrs.text, "projection distributed over set operator");
            output.insert(first_operand + 1, attrs);
            output.insert(first_operand + 1, operator);
        }
    }

    /// Splitting projection over a theta join (see module docs).
    fn apply_theta_join(
        &self,
        operator: &Token,
        next: Option<&Token>,
        output: &mut Vec<Token>,
    ) -> usize {
        let Some(condition) = next.filter(|t| t.kind == TokenKind::Condition) else {
            output.push(operator.clone());
            return 1;
        };

        if let Some((attrs_pos, operands)) = trailing_projection(output)
            && operands >= 2
        {
            self.split_projection_over_join(attrs_pos, condition, output);
        }

        output.push(operator.clone());
        output.push(condition.clone());
        2
    }

    fn split_projection_over_join(
        &self,
        attrs_pos: usize,
        condition: &Token,
        output: &mut Vec<Token>,
    ) {
        let Some(left_pos) =
            (attrs_pos + 1..output.len()).find(|&pos| output[pos].kind == TokenKind::Operand)
        else {
            return;
        };
        let Some(right_pos) =
            (left_pos + 1..output.len()).find(|&pos| output[pos].kind == TokenKind::Operand)
        else {
            return;
        };

        let projected = tokenize(&output[attrs_pos].text, &self.config);
        let referenced = condition_attributes(&condition.text, &self.config);
        let left_table = output[left_pos].text.clone();
        let right_table = output[right_pos].text.clone();

        let (Some(left_list), Some(right_list)) = (
            filter_to_schema(&projected, &left_table, self.catalog),
            filter_to_schema(&projected, &right_table, self.catalog),
        ) else {
            debug!(left = %left_table, right = %right_table, "schema unknown, join subtree emitted unchanged");
            return;
        };

        let projection = output[attrs_pos - 1].clone();
        if is_subset(&referenced, &projected) {
            // The condition only mentions projected attributes: the existing
            // projection narrows to the left side's attributes and a new one
            // covers the right side.
            debug!(projection = %output[attrs_pos].text, "projection split over theta join");
            output[attrs_pos].text = join(&left_list, &self.config);
            output.insert(right_pos, Token::attributes(join(&right_list, &self.config)));
            output.insert(right_pos, projection);
        } else {
            // The condition needs attributes outside the projection list:
            // keep the outer projection and push augmented per-side
            // projections below both operands.
            let (Some(left_extra), Some(right_extra)) = (
                filter_to_schema(&referenced, &left_table, self.catalog),
                filter_to_schema(&referenced, &right_table, self.catalog),
            ) else {
                return;
            };

            let left_full = dedup([left_list, left_extra].concat());
            let right_full = dedup([right_list, right_extra].concat());
            debug!(left = %join(&left_full, &self.config), right = %join(&right_full, &self.config), "projection split over theta join with augmented sides");
            output.insert(right_pos, Token::attributes(join(&right_full, &self.config)));
            output.insert(right_pos, projection.clone());
            output.insert(left_pos, Token::attributes(join(&left_full, &self.config)));
            output.insert(left_pos, projection);
        }
    }
}

/// Walk the emitted suffix backwards over operand and attribute tokens,
/// looking for a projection payload directly preceded by its operator.
/// Returns the payload position and the number of operand tokens between it
/// and the end of the output.
fn trailing_projection(output: &[Token]) -> Option<(usize, usize)> {
    let mut index = output.len();
    let mut operands = 0usize;

    while index > 0 {
        let token = &output[index - 1];
        match token.kind {
            TokenKind::Operand => {
                operands += 1;
                index -= 1;
            }
            TokenKind::Attributes => {
                if index >= 2
                    && output[index - 2].operator_code() == Some(OperatorCode::Projection)
                {
                    return Some((index - 1, operands));
                }
                index -= 1;
            }
            _ => return None,
        }
    }
    None
}
