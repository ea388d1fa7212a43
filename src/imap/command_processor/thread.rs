//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Mailvane.
//
// Mailvane is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailvane is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailvane. If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;

use super::defs::*;
use super::search::check_charset;
use crate::imap::syntax::SearchKey;
use crate::imap::threading::{self, ThreadAlgorithm};

impl CommandProcessor {
    pub(super) async fn cmd_thread(
        &mut self,
        uid: bool,
        algorithm: ThreadAlgorithm,
        charset: String,
        criteria: SearchKey,
        sender: &SendResponse,
    ) -> CmdResult {
        check_charset(Some(&charset))?;

        let hits = self.search_messages(&criteria).await?;
        let seqs = hits
            .iter()
            .map(|&(seq, ref m)| (m.uid, seq))
            .collect::<HashMap<_, _>>();
        let messages = hits.iter().map(|(_, m)| m).collect::<Vec<_>>();

        let forest = threading::thread(algorithm, &messages, |m| {
            if uid {
                m.uid
            } else {
                seqs.get(&m.uid).copied().unwrap_or(m.seq)
            }
        });

        send_response(sender, s::Response::Thread(forest)).await;
        success("THREAD completed")
    }
}
