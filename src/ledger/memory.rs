//! In-memory ledger
//!
//! A self-contained guild contract plus fungible tokens. It backs the
//! `develop` network and every test. A successful mutating call mines exactly
//! one block; a reverted call leaves state untouched. Every mutating call
//! attempt, reverted or not, is appended to a journal.

use super::{
    DaoGateway, EventFilter, LedgerError, LedgerEvent, LedgerResult, LoggedEvent, MemberRecord,
    ProposalFlags, ProposalKind, ProposalRecord, ProposalSubmission, Receipt, TokenAmount,
    TokenGateway,
};
use crate::types::{Address, Amount, BlockNumber, ProposalId, Signer, Vote, Weight, MAX_WEIGHT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Internal account holding the guild bank
const GUILD: u64 = 0xdead;
/// Internal account holding tribute and deposits until processing
const ESCROW: u64 = 0xbeef;
const MAX_TOKEN_WHITELIST_COUNT: usize = 400;

/// Parameters the simulated guild is summoned with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulationParams {
    pub summoner: Address,
    pub deposit_token: Address,
    #[serde(default)]
    pub approved_tokens: Vec<Address>,
    pub proposal_deposit: Amount,
    pub processing_reward: Amount,
    pub voting_period_length: u64,
    pub grace_period_length: u64,
    pub summoner_shares: Weight,
    /// Deposit-token balance the summoner starts with
    #[serde(default)]
    pub summoner_balance: Amount,
    /// Seconds per period; `None` means periods only move via `advance_periods`
    #[serde(default)]
    pub period_duration_secs: Option<u64>,
}

/// One mutating call attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub caller: Address,
    pub method: &'static str,
    pub reverted: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct TokenState {
    balances: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
}

#[derive(Debug, Clone)]
struct Chain {
    dao: Address,
    block: BlockNumber,
    summoned_at: DateTime<Utc>,
    period_offset: u64,
    params: SimulationParams,
    tokens: HashMap<Address, TokenState>,
    whitelist: Vec<Address>,
    members: BTreeMap<Address, MemberRecord>,
    /// delegate key -> member address
    delegates: HashMap<Address, Address>,
    proposals: Vec<ProposalRecord>,
    votes: HashMap<(ProposalId, Address), Vote>,
    queue: Vec<ProposalId>,
    /// (holder, token) -> balance held inside the guild contract
    internal: HashMap<(Address, Address), u128>,
    proposed_to_whitelist: HashSet<Address>,
    proposed_to_kick: HashSet<Address>,
    log: Vec<LoggedEvent>,
}

fn revert<T>(reason: &str) -> LedgerResult<T> {
    Err(LedgerError::Reverted(reason.to_string()))
}

fn weight(value: u128) -> LedgerResult<Weight> {
    Weight::new(value).map_err(|_| LedgerError::Reverted("too many shares requested".to_string()))
}

/// `balance * part / total` without overflowing on large balances
fn fair_share(balance: u128, part: u128, total: u128) -> u128 {
    if total == 0 {
        return 0;
    }
    (balance / total) * part + (balance % total) * part / total
}

fn tx_hash(block: BlockNumber, caller: &Address, method: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block.to_be_bytes());
    hasher.update(caller.as_str().as_bytes());
    hasher.update(method.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("0x{}", hex)
}

impl Chain {
    fn summon(dao: Address, params: SimulationParams) -> LedgerResult<Self> {
        if params.summoner.is_zero() {
            return revert("summoner cannot be 0");
        }
        let mut whitelist = vec![params.deposit_token.clone()];
        for token in &params.approved_tokens {
            if !whitelist.contains(token) {
                whitelist.push(token.clone());
            }
        }

        let mut tokens = HashMap::new();
        for token in &whitelist {
            tokens.insert(token.clone(), TokenState::default());
        }
        if !params.summoner_balance.is_zero() {
            if let Some(state) = tokens.get_mut(&params.deposit_token) {
                state
                    .balances
                    .insert(params.summoner.clone(), params.summoner_balance.value());
            }
        }

        let summoner = params.summoner.clone();
        let mut members = BTreeMap::new();
        members.insert(
            summoner.clone(),
            MemberRecord {
                delegate_key: summoner.clone(),
                shares: params.summoner_shares,
                loot: Weight::ZERO,
                exists: true,
                highest_index_yes_vote: 0,
                jailed: false,
            },
        );
        let mut delegates = HashMap::new();
        delegates.insert(summoner.clone(), summoner);

        Ok(Self {
            dao,
            block: 0,
            summoned_at: Utc::now(),
            period_offset: 0,
            params,
            tokens,
            whitelist,
            members,
            delegates,
            proposals: Vec::new(),
            votes: HashMap::new(),
            queue: Vec::new(),
            internal: HashMap::new(),
            proposed_to_whitelist: HashSet::new(),
            proposed_to_kick: HashSet::new(),
            log: Vec::new(),
        })
    }

    fn current_period(&self) -> u64 {
        let elapsed = match self.params.period_duration_secs {
            Some(secs) if secs > 0 => {
                let seconds = (Utc::now() - self.summoned_at).num_seconds().max(0) as u64;
                seconds / secs
            }
            _ => 0,
        };
        elapsed + self.period_offset
    }

    // -------------------------------------------------------------------------
    // Tokens
    // -------------------------------------------------------------------------

    fn token(&self, token: &Address) -> LedgerResult<&TokenState> {
        self.tokens
            .get(token)
            .ok_or_else(|| LedgerError::Reverted("call to non-contract address".to_string()))
    }

    fn token_mut(&mut self, token: &Address) -> LedgerResult<&mut TokenState> {
        self.tokens
            .get_mut(token)
            .ok_or_else(|| LedgerError::Reverted("call to non-contract address".to_string()))
    }

    fn transfer(&mut self, token: &Address, from: &Address, to: &Address, amount: u128) -> LedgerResult<()> {
        let state = self.token_mut(token)?;
        let have = state.balances.get(from).copied().unwrap_or(0);
        if have < amount {
            return revert("transfer amount exceeds balance");
        }
        state.balances.insert(from.clone(), have - amount);
        *state.balances.entry(to.clone()).or_insert(0) += amount;
        Ok(())
    }

    /// Pull `amount` from `from` into the guild contract using the contract's allowance
    fn pull(&mut self, token: &Address, from: &Address, amount: u128) -> LedgerResult<()> {
        let dao = self.dao.clone();
        let state = self.token_mut(token)?;
        let key = (from.clone(), dao.clone());
        let allowed = state.allowances.get(&key).copied().unwrap_or(0);
        if allowed < amount {
            return revert("transfer amount exceeds allowance");
        }
        state.allowances.insert(key, allowed - amount);
        self.transfer(token, from, &dao, amount)
    }

    // -------------------------------------------------------------------------
    // Internal accounting
    // -------------------------------------------------------------------------

    fn internal_balance(&self, holder: &Address, token: &Address) -> u128 {
        self.internal
            .get(&(holder.clone(), token.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn credit(&mut self, holder: &Address, token: &Address, amount: u128) {
        if amount > 0 {
            *self.internal.entry((holder.clone(), token.clone())).or_insert(0) += amount;
        }
    }

    fn move_internal(&mut self, from: &Address, to: &Address, token: &Address, amount: u128) -> LedgerResult<()> {
        let have = self.internal_balance(from, token);
        if have < amount {
            return revert("insufficient balance");
        }
        self.internal.insert((from.clone(), token.clone()), have - amount);
        self.credit(to, token, amount);
        Ok(())
    }

    fn total_internal(&self, token: &Address) -> u128 {
        self.internal
            .iter()
            .filter(|((_, t), _)| t == token)
            .map(|(_, amount)| *amount)
            .sum()
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    fn member(&self, address: &Address) -> MemberRecord {
        self.members
            .get(address)
            .cloned()
            .unwrap_or_else(MemberRecord::absent)
    }

    fn total_shares_and_loot(&self) -> u128 {
        self.members
            .values()
            .map(|m| m.shares.value() + m.loot.value())
            .sum()
    }

    /// Resolve a delegate key to the shareholder it votes for
    fn only_delegate(&self, caller: &Address) -> LedgerResult<Address> {
        match self.delegates.get(caller) {
            Some(owner) if !self.member(owner).shares.is_zero() => Ok(owner.clone()),
            _ => revert("not a delegate"),
        }
    }

    fn can_ragequit(&self, member: &Address) -> LedgerResult<()> {
        let voted_yes = self
            .votes
            .iter()
            .any(|((_, voter), vote)| voter == member && *vote == Vote::Yes);
        if !voted_yes {
            return Ok(());
        }
        let highest = self.member(member).highest_index_yes_vote as usize;
        let processed = self
            .queue
            .get(highest)
            .and_then(|id| self.proposals.get(*id as usize))
            .map(|p| p.flags.processed)
            .unwrap_or(false);
        if !processed {
            return revert("cannot ragequit until highest index proposal member voted YES on is processed");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Proposals
    // -------------------------------------------------------------------------

    fn proposal_mut(&mut self, id: ProposalId) -> LedgerResult<&mut ProposalRecord> {
        self.proposals
            .get_mut(id as usize)
            .ok_or_else(|| LedgerError::Reverted("proposal does not exist".to_string()))
    }

    fn queue_index(&self, id: ProposalId) -> LedgerResult<usize> {
        self.queue
            .iter()
            .position(|queued| *queued == id)
            .ok_or_else(|| LedgerError::Reverted("proposal does not exist".to_string()))
    }

    fn check_whitelisted(&self, token: &Address, reason: &str) -> LedgerResult<()> {
        if !self.whitelist.contains(token) {
            return revert(reason);
        }
        Ok(())
    }

    fn push_proposal(
        &mut self,
        proposer: &Address,
        applicant: Address,
        details: &str,
        flags: ProposalFlags,
        shares: Weight,
        loot: Weight,
        tribute: (Amount, Address),
        payment: (Amount, Address),
    ) -> LedgerEvent {
        let id = self.proposals.len() as ProposalId;
        self.proposals.push(ProposalRecord {
            id,
            applicant: applicant.clone(),
            proposer: proposer.clone(),
            sponsor: None,
            shares_requested: shares,
            loot_requested: loot,
            tribute_offered: tribute.0,
            tribute_token: tribute.1,
            payment_requested: payment.0,
            payment_token: payment.1,
            starting_period: 0,
            yes_votes: Weight::ZERO,
            no_votes: Weight::ZERO,
            details: details.to_string(),
            flags,
        });
        LedgerEvent::SubmitProposal {
            proposal_id: id,
            applicant,
            member_address: proposer.clone(),
        }
    }

    fn submit(&mut self, caller: &Address, s: &ProposalSubmission) -> LedgerResult<Vec<LedgerEvent>> {
        if s.shares_requested.value() + s.loot_requested.value() > MAX_WEIGHT {
            return revert("too many shares requested");
        }
        self.check_whitelisted(&s.tribute_token, "tributeToken is not whitelisted")?;
        self.check_whitelisted(&s.payment_token, "payment is not whitelisted")?;
        if s.applicant.is_zero() {
            return revert("applicant cannot be 0");
        }
        let reserved = [Address::from_low_u64(GUILD), Address::from_low_u64(ESCROW)];
        if reserved.contains(&s.applicant) {
            return revert("applicant address cannot be reserved");
        }
        if self.member(&s.applicant).jailed {
            return revert("proposal applicant must not be jailed");
        }

        if !s.tribute_offered.is_zero() {
            self.pull(&s.tribute_token, &s.applicant, s.tribute_offered.value())?;
            self.credit(&Address::from_low_u64(ESCROW), &s.tribute_token, s.tribute_offered.value());
        }

        let event = self.push_proposal(
            caller,
            s.applicant.clone(),
            &s.details,
            ProposalFlags::default(),
            s.shares_requested,
            s.loot_requested,
            (s.tribute_offered, s.tribute_token.clone()),
            (s.payment_requested, s.payment_token.clone()),
        );
        Ok(vec![event])
    }

    fn submit_whitelist(&mut self, caller: &Address, token: &Address, details: &str) -> LedgerResult<Vec<LedgerEvent>> {
        if token.is_zero() {
            return revert("must provide token address");
        }
        if self.whitelist.contains(token) {
            return revert("cannot already have whitelisted the token");
        }
        if self.whitelist.len() >= MAX_TOKEN_WHITELIST_COUNT {
            return revert("cannot submit more whitelist proposals");
        }
        let flags = ProposalFlags {
            whitelist: true,
            ..ProposalFlags::default()
        };
        let event = self.push_proposal(
            caller,
            Address::zero(),
            details,
            flags,
            Weight::ZERO,
            Weight::ZERO,
            (Amount::ZERO, token.clone()),
            (Amount::ZERO, Address::zero()),
        );
        Ok(vec![event])
    }

    fn submit_guild_kick(&mut self, caller: &Address, member: &Address, details: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let record = self.member(member);
        if record.shares.is_zero() && record.loot.is_zero() {
            return revert("member must have at least one share or one loot");
        }
        if record.jailed {
            return revert("member must not already be jailed");
        }
        let flags = ProposalFlags {
            guild_kick: true,
            ..ProposalFlags::default()
        };
        let event = self.push_proposal(
            caller,
            member.clone(),
            details,
            flags,
            Weight::ZERO,
            Weight::ZERO,
            (Amount::ZERO, Address::zero()),
            (Amount::ZERO, Address::zero()),
        );
        Ok(vec![event])
    }

    fn sponsor(&mut self, caller: &Address, id: ProposalId) -> LedgerResult<Vec<LedgerEvent>> {
        let member_address = self.only_delegate(caller)?;
        let deposit_token = self.params.deposit_token.clone();
        let deposit = self.params.proposal_deposit.value();
        self.pull(&deposit_token, caller, deposit)?;
        self.credit(&Address::from_low_u64(ESCROW), &deposit_token, deposit);

        let proposal = self
            .proposals
            .get(id as usize)
            .cloned()
            .ok_or_else(|| LedgerError::Reverted("proposal must have been proposed".to_string()))?;
        if proposal.flags.sponsored {
            return revert("proposal has already been sponsored");
        }
        if proposal.flags.cancelled {
            return revert("proposal has been cancelled");
        }
        if self.member(&proposal.applicant).jailed {
            return revert("proposal applicant must not be jailed");
        }

        match proposal.kind() {
            ProposalKind::Whitelist => {
                if self.whitelist.contains(&proposal.tribute_token) {
                    return revert("cannot already have whitelisted the token");
                }
                if !self.proposed_to_whitelist.insert(proposal.tribute_token.clone()) {
                    return revert("already proposed to whitelist");
                }
            }
            ProposalKind::GuildKick => {
                if !self.proposed_to_kick.insert(proposal.applicant.clone()) {
                    return revert("already proposed to kick");
                }
            }
            ProposalKind::Standard => {}
        }

        let last_start = self
            .queue
            .last()
            .and_then(|last| self.proposals.get(*last as usize))
            .map(|p| p.starting_period)
            .unwrap_or(0);
        let starting_period = self.current_period().max(last_start) + 1;

        let record = self.proposal_mut(id)?;
        record.starting_period = starting_period;
        record.flags.sponsored = true;
        record.sponsor = Some(member_address.clone());

        self.queue.push(id);
        let proposal_index = (self.queue.len() - 1) as u64;

        Ok(vec![LedgerEvent::SponsorProposal {
            delegate_key: caller.clone(),
            member_address,
            proposal_id: id,
            proposal_index,
            starting_period,
        }])
    }

    fn vote(&mut self, caller: &Address, id: ProposalId, vote: Vote) -> LedgerResult<Vec<LedgerEvent>> {
        let member_address = self.only_delegate(caller)?;
        let proposal_index = self.queue_index(id)?;
        let current_period = self.current_period();
        let voting_length = self.params.voting_period_length;
        let proposal = self.proposal_mut(id)?.clone();

        if current_period < proposal.starting_period {
            return revert("voting period has not started");
        }
        if current_period >= proposal.starting_period + voting_length {
            return revert("proposal voting period has expired");
        }
        if self.votes.contains_key(&(id, member_address.clone())) {
            return revert("member has already voted");
        }

        let voter_shares = self.member(&member_address).shares.value();
        let record = self.proposal_mut(id)?;
        match vote {
            Vote::Yes => record.yes_votes = weight(record.yes_votes.value() + voter_shares)?,
            Vote::No => record.no_votes = weight(record.no_votes.value() + voter_shares)?,
        }
        self.votes.insert((id, member_address.clone()), vote);

        if vote == Vote::Yes {
            if let Some(member) = self.members.get_mut(&member_address) {
                member.highest_index_yes_vote = member.highest_index_yes_vote.max(proposal_index as u64);
            }
        }

        Ok(vec![LedgerEvent::SubmitVote {
            proposal_id: id,
            proposal_index: proposal_index as u64,
            delegate_key: caller.clone(),
            member_address,
            vote,
        }])
    }

    /// Checks shared by the three process variants; marks the proposal processed
    fn begin_processing(&mut self, id: ProposalId, expected: ProposalKind) -> LedgerResult<(usize, ProposalRecord)> {
        let index = self.queue_index(id)?;
        let proposal = self.proposal_mut(id)?.clone();
        if proposal.flags.processed {
            return revert("proposal has already been processed");
        }
        match (expected, proposal.kind()) {
            (ProposalKind::Standard, ProposalKind::Whitelist) => {
                return revert("must use processWhitelistProposal")
            }
            (ProposalKind::Standard, ProposalKind::GuildKick) => {
                return revert("must use processGuildKickProposal")
            }
            (ProposalKind::Whitelist, kind) if kind != ProposalKind::Whitelist => {
                return revert("whitelist flag must be set")
            }
            (ProposalKind::GuildKick, kind) if kind != ProposalKind::GuildKick => {
                return revert("guild kick flag must be set")
            }
            _ => {}
        }
        let ready_at = proposal.starting_period
            + self.params.voting_period_length
            + self.params.grace_period_length;
        if self.current_period() < ready_at {
            return revert("proposal is not ready to be processed");
        }
        if index > 0 {
            let previous = self.queue[index - 1];
            let previous_processed = self
                .proposals
                .get(previous as usize)
                .map(|p| p.flags.processed)
                .unwrap_or(false);
            if !previous_processed {
                return revert("previous proposal must be processed");
            }
        }
        self.proposal_mut(id)?.flags.processed = true;
        Ok((index, proposal))
    }

    /// Processing reward to the caller, the rest of the deposit back to the sponsor
    fn return_deposit(&mut self, caller: &Address, sponsor: &Address) -> LedgerResult<()> {
        let escrow = Address::from_low_u64(ESCROW);
        let token = self.params.deposit_token.clone();
        let deposit = self.params.proposal_deposit.value();
        let reward = self.params.processing_reward.value().min(deposit);
        self.move_internal(&escrow, caller, &token, reward)?;
        self.move_internal(&escrow, sponsor, &token, deposit - reward)
    }

    fn process(&mut self, caller: &Address, id: ProposalId) -> LedgerResult<Vec<LedgerEvent>> {
        let (index, proposal) = self.begin_processing(id, ProposalKind::Standard)?;
        let guild = Address::from_low_u64(GUILD);
        let escrow = Address::from_low_u64(ESCROW);

        let requested = proposal.shares_requested.value() + proposal.loot_requested.value();
        let mut did_pass = proposal.yes_votes > proposal.no_votes;
        if did_pass && self.total_shares_and_loot() + requested > MAX_WEIGHT {
            did_pass = false;
        }
        if did_pass
            && proposal.payment_requested.value() > self.internal_balance(&guild, &proposal.payment_token)
        {
            did_pass = false;
        }

        if did_pass {
            self.proposal_mut(id)?.flags.did_pass = true;
            let applicant = proposal.applicant.clone();
            let existing = self.member(&applicant);
            if existing.exists {
                let shares = weight(existing.shares.value() + proposal.shares_requested.value())?;
                let loot = weight(existing.loot.value() + proposal.loot_requested.value())?;
                if let Some(member) = self.members.get_mut(&applicant) {
                    member.shares = shares;
                    member.loot = loot;
                }
            } else {
                // The applicant's address may be in use as someone else's delegate key
                if let Some(owner) = self.delegates.get(&applicant).cloned() {
                    if let Some(holder) = self.members.get_mut(&owner) {
                        holder.delegate_key = owner.clone();
                    }
                    self.delegates.insert(owner.clone(), owner);
                }
                self.members.insert(
                    applicant.clone(),
                    MemberRecord {
                        delegate_key: applicant.clone(),
                        shares: proposal.shares_requested,
                        loot: proposal.loot_requested,
                        exists: true,
                        highest_index_yes_vote: 0,
                        jailed: false,
                    },
                );
                self.delegates.insert(applicant.clone(), applicant.clone());
            }
            self.move_internal(&escrow, &guild, &proposal.tribute_token, proposal.tribute_offered.value())?;
            self.move_internal(&guild, &applicant, &proposal.payment_token, proposal.payment_requested.value())?;
        } else {
            self.move_internal(
                &escrow,
                &proposal.applicant,
                &proposal.tribute_token,
                proposal.tribute_offered.value(),
            )?;
        }

        let sponsor = proposal.sponsor.clone().unwrap_or_else(|| proposal.proposer.clone());
        self.return_deposit(caller, &sponsor)?;

        Ok(vec![LedgerEvent::ProcessProposal {
            proposal_index: index as u64,
            proposal_id: id,
            did_pass,
        }])
    }

    fn process_whitelist(&mut self, caller: &Address, id: ProposalId) -> LedgerResult<Vec<LedgerEvent>> {
        let (index, proposal) = self.begin_processing(id, ProposalKind::Whitelist)?;
        let mut did_pass = proposal.yes_votes > proposal.no_votes;
        if self.whitelist.len() >= MAX_TOKEN_WHITELIST_COUNT {
            did_pass = false;
        }
        if did_pass {
            self.proposal_mut(id)?.flags.did_pass = true;
            self.whitelist.push(proposal.tribute_token.clone());
            self.tokens.entry(proposal.tribute_token.clone()).or_default();
        }
        self.proposed_to_whitelist.remove(&proposal.tribute_token);

        let sponsor = proposal.sponsor.clone().unwrap_or_else(|| proposal.proposer.clone());
        self.return_deposit(caller, &sponsor)?;

        Ok(vec![LedgerEvent::ProcessWhitelistProposal {
            proposal_index: index as u64,
            proposal_id: id,
            did_pass,
        }])
    }

    fn process_guild_kick(&mut self, caller: &Address, id: ProposalId) -> LedgerResult<Vec<LedgerEvent>> {
        let (index, proposal) = self.begin_processing(id, ProposalKind::GuildKick)?;
        let did_pass = proposal.yes_votes > proposal.no_votes;
        if did_pass {
            self.proposal_mut(id)?.flags.did_pass = true;
            if let Some(member) = self.members.get_mut(&proposal.applicant) {
                member.jailed = true;
                member.loot = weight(member.loot.value() + member.shares.value())?;
                member.shares = Weight::ZERO;
            }
        }
        self.proposed_to_kick.remove(&proposal.applicant);

        let sponsor = proposal.sponsor.clone().unwrap_or_else(|| proposal.proposer.clone());
        self.return_deposit(caller, &sponsor)?;

        Ok(vec![LedgerEvent::ProcessGuildKickProposal {
            proposal_index: index as u64,
            proposal_id: id,
            did_pass,
        }])
    }

    fn cancel(&mut self, caller: &Address, id: ProposalId) -> LedgerResult<Vec<LedgerEvent>> {
        let proposal = self.proposal_mut(id)?.clone();
        if proposal.flags.sponsored {
            return revert("proposal has already been sponsored");
        }
        if proposal.flags.cancelled {
            return revert("proposal has already been cancelled");
        }
        if &proposal.proposer != caller {
            return revert("solely the proposer can cancel");
        }
        self.proposal_mut(id)?.flags.cancelled = true;
        self.move_internal(
            &Address::from_low_u64(ESCROW),
            &proposal.applicant,
            &proposal.tribute_token,
            proposal.tribute_offered.value(),
        )?;
        Ok(vec![LedgerEvent::CancelProposal {
            proposal_id: id,
            applicant_address: proposal.applicant,
        }])
    }

    fn burn(&mut self, member_address: &Address, shares: Weight, loot: Weight) -> LedgerResult<Vec<LedgerEvent>> {
        let member = self.member(member_address);
        if member.shares < shares {
            return revert("insufficient shares");
        }
        if member.loot < loot {
            return revert("insufficient loot");
        }
        self.can_ragequit(member_address)?;

        let initial_total = self.total_shares_and_loot();
        let to_burn = shares.value() + loot.value();
        if let Some(record) = self.members.get_mut(member_address) {
            record.shares = weight(record.shares.value() - shares.value())?;
            record.loot = weight(record.loot.value() - loot.value())?;
        }

        let guild = Address::from_low_u64(GUILD);
        let mut returned = Vec::new();
        for token in self.whitelist.clone() {
            let amount = fair_share(self.internal_balance(&guild, &token), to_burn, initial_total);
            if amount > 0 {
                self.move_internal(&guild, member_address, &token, amount)?;
                returned.push(TokenAmount {
                    token,
                    amount: Amount::new(amount),
                });
            }
        }

        Ok(vec![LedgerEvent::Ragequit {
            member_address: member_address.clone(),
            shares_to_burn: shares,
            loot_to_burn: loot,
            returned,
        }])
    }

    fn ragequit(&mut self, caller: &Address, shares: Weight, loot: Weight) -> LedgerResult<Vec<LedgerEvent>> {
        let member = self.member(caller);
        if member.shares.is_zero() && member.loot.is_zero() {
            return revert("not a member");
        }
        self.burn(caller, shares, loot)
    }

    fn ragekick(&mut self, member_address: &Address) -> LedgerResult<Vec<LedgerEvent>> {
        let member = self.member(member_address);
        if !member.jailed {
            return revert("member must be in jail");
        }
        if member.loot.is_zero() {
            return revert("member must have some loot");
        }
        self.burn(member_address, Weight::ZERO, member.loot)
    }

    fn update_delegate(&mut self, caller: &Address, new_delegate: &Address) -> LedgerResult<Vec<LedgerEvent>> {
        let member = self.member(caller);
        if member.shares.is_zero() {
            return revert("not a shareholder");
        }
        if new_delegate.is_zero() {
            return revert("newDelegateKey cannot be 0");
        }
        if new_delegate != caller {
            if self.member(new_delegate).exists {
                return revert("cannot overwrite existing members");
            }
            if let Some(owner) = self.delegates.get(new_delegate) {
                if self.member(owner).exists {
                    return revert("cannot overwrite existing delegate keys");
                }
            }
        }
        self.delegates.remove(&member.delegate_key);
        self.delegates.insert(new_delegate.clone(), caller.clone());
        if let Some(record) = self.members.get_mut(caller) {
            record.delegate_key = new_delegate.clone();
        }
        Ok(vec![LedgerEvent::UpdateDelegateKey {
            member_address: caller.clone(),
            new_delegate_key: new_delegate.clone(),
        }])
    }

    fn withdraw(&mut self, caller: &Address, token: &Address, amount: Amount) -> LedgerResult<Vec<LedgerEvent>> {
        let have = self.internal_balance(caller, token);
        if have < amount.value() {
            return revert("insufficient balance");
        }
        self.internal.insert((caller.clone(), token.clone()), have - amount.value());
        let dao = self.dao.clone();
        self.transfer(token, &dao, caller, amount.value())?;
        Ok(vec![LedgerEvent::Withdraw {
            member_address: caller.clone(),
            token: token.clone(),
            amount,
        }])
    }

    fn collect(&mut self, caller: &Address, token: &Address) -> LedgerResult<Vec<LedgerEvent>> {
        self.only_delegate(caller)?;
        let held = self.token(token)?.balances.get(&self.dao).copied().unwrap_or(0);
        let accounted = self.total_internal(token);
        let amount = held.saturating_sub(accounted);
        if amount == 0 {
            return revert("no tokens to collect");
        }
        self.check_whitelisted(token, "token to collect must be whitelisted")?;
        let guild = Address::from_low_u64(GUILD);
        if self.internal_balance(&guild, token) == 0 {
            return revert("token to collect must have non-zero guild bank balance");
        }
        self.credit(&guild, token, amount);
        Ok(vec![LedgerEvent::TokensCollected {
            token: token.clone(),
            amount_to_collect: Amount::new(amount),
        }])
    }
}

/// Simulated guild contract and the tokens it escrows
pub struct InMemoryLedger {
    address: Address,
    chain: RwLock<Chain>,
    journal: RwLock<Vec<CallRecord>>,
}

impl InMemoryLedger {
    /// Summon a guild at `address` with the summoner as its only member
    pub fn new(address: Address, params: SimulationParams) -> Result<Self, LedgerError> {
        let chain = Chain::summon(address.clone(), params)?;
        Ok(Self {
            address,
            chain: RwLock::new(chain),
            journal: RwLock::new(Vec::new()),
        })
    }

    /// Credit `amount` of a token to `holder`, deploying the token if needed
    #[cfg(test)]
    pub async fn mint(&self, token: &Address, holder: &Address, amount: Amount) {
        let mut chain = self.chain.write().await;
        let state = chain.tokens.entry(token.clone()).or_default();
        *state.balances.entry(holder.clone()).or_insert(0) += amount.value();
    }

    #[cfg(test)]
    pub async fn advance_periods(&self, periods: u64) {
        self.chain.write().await.period_offset += periods;
    }

    /// Every mutating call attempted so far, in order
    #[cfg(test)]
    pub async fn calls(&self) -> Vec<CallRecord> {
        self.journal.read().await.clone()
    }

    /// Journal entries for one method name
    #[cfg(test)]
    pub async fn calls_to(&self, method: &str) -> usize {
        self.journal
            .read()
            .await
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    async fn execute<F>(&self, signer: &Signer, method: &'static str, op: F) -> LedgerResult<Receipt>
    where
        F: FnOnce(&mut Chain, &Address) -> LedgerResult<Vec<LedgerEvent>> + Send,
    {
        let caller = signer.address();
        let mut chain = self.chain.write().await;
        let mut draft = chain.clone();
        let outcome = op(&mut draft, caller);
        let mut journal = self.journal.write().await;

        match outcome {
            Ok(events) => {
                draft.block += 1;
                let block_number = draft.block;
                let hash = tx_hash(block_number, caller, method);
                for event in &events {
                    draft.log.push(LoggedEvent {
                        block_number,
                        tx_hash: hash.clone(),
                        event: event.clone(),
                    });
                }
                *chain = draft;
                journal.push(CallRecord {
                    caller: caller.clone(),
                    method,
                    reverted: None,
                });
                debug!("⛓️  {} by {} mined in block {}", method, caller, block_number);
                Ok(Receipt {
                    tx_hash: hash,
                    block_number,
                    events,
                })
            }
            Err(err) => {
                journal.push(CallRecord {
                    caller: caller.clone(),
                    method,
                    reverted: Some(err.to_string()),
                });
                debug!("⛓️  {} by {} reverted: {}", method, caller, err);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl TokenGateway for InMemoryLedger {
    async fn balance_of(&self, token: &Address, holder: &Address) -> LedgerResult<Amount> {
        let chain = self.chain.read().await;
        let state = chain.token(token)?;
        Ok(Amount::new(state.balances.get(holder).copied().unwrap_or(0)))
    }

    async fn allowance(&self, token: &Address, holder: &Address, spender: &Address) -> LedgerResult<Amount> {
        let chain = self.chain.read().await;
        let state = chain.token(token)?;
        let key = (holder.clone(), spender.clone());
        Ok(Amount::new(state.allowances.get(&key).copied().unwrap_or(0)))
    }

    async fn approve(&self, token: &Address, signer: &Signer, spender: &Address, amount: Amount) -> LedgerResult<Receipt> {
        self.execute(signer, "approve", |chain, caller| {
            let state = chain.token_mut(token)?;
            state
                .allowances
                .insert((caller.clone(), spender.clone()), amount.value());
            Ok(vec![LedgerEvent::Approval {
                token: token.clone(),
                owner: caller.clone(),
                spender: spender.clone(),
                amount,
            }])
        })
        .await
    }
}

#[async_trait]
impl DaoGateway for InMemoryLedger {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn proposal_deposit(&self) -> LedgerResult<Amount> {
        Ok(self.chain.read().await.params.proposal_deposit)
    }

    async fn deposit_token(&self) -> LedgerResult<Address> {
        Ok(self.chain.read().await.params.deposit_token.clone())
    }

    async fn proposal_count(&self) -> LedgerResult<u64> {
        Ok(self.chain.read().await.proposals.len() as u64)
    }

    async fn proposal(&self, id: ProposalId) -> LedgerResult<ProposalRecord> {
        self.chain
            .read()
            .await
            .proposals
            .get(id as usize)
            .cloned()
            .ok_or_else(|| LedgerError::Reverted("proposal does not exist".to_string()))
    }

    async fn member(&self, address: &Address) -> LedgerResult<MemberRecord> {
        Ok(self.chain.read().await.member(address))
    }

    async fn user_token_balance(&self, member: &Address, token: &Address) -> LedgerResult<Amount> {
        Ok(Amount::new(self.chain.read().await.internal_balance(member, token)))
    }

    async fn block_number(&self) -> LedgerResult<BlockNumber> {
        Ok(self.chain.read().await.block)
    }

    async fn events(&self, filter: &EventFilter) -> LedgerResult<Vec<LoggedEvent>> {
        let chain = self.chain.read().await;
        Ok(chain
            .log
            .iter()
            .filter(|e| e.block_number >= filter.from_block && e.block_number <= filter.to_block)
            .filter(|e| e.event.kind() == filter.kind)
            .cloned()
            .collect())
    }

    async fn submit_proposal(&self, signer: &Signer, submission: &ProposalSubmission) -> LedgerResult<Receipt> {
        self.execute(signer, "submitProposal", |chain, caller| chain.submit(caller, submission))
            .await
    }

    async fn submit_whitelist_proposal(&self, signer: &Signer, token: &Address, details: &str) -> LedgerResult<Receipt> {
        self.execute(signer, "submitWhitelistProposal", |chain, caller| {
            chain.submit_whitelist(caller, token, details)
        })
        .await
    }

    async fn submit_guild_kick_proposal(&self, signer: &Signer, member: &Address, details: &str) -> LedgerResult<Receipt> {
        self.execute(signer, "submitGuildKickProposal", |chain, caller| {
            chain.submit_guild_kick(caller, member, details)
        })
        .await
    }

    async fn sponsor_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt> {
        self.execute(signer, "sponsorProposal", |chain, caller| chain.sponsor(caller, id))
            .await
    }

    async fn submit_vote(&self, signer: &Signer, id: ProposalId, vote: Vote) -> LedgerResult<Receipt> {
        self.execute(signer, "submitVote", |chain, caller| chain.vote(caller, id, vote))
            .await
    }

    async fn process_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt> {
        self.execute(signer, "processProposal", |chain, caller| chain.process(caller, id))
            .await
    }

    async fn process_whitelist_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt> {
        self.execute(signer, "processWhitelistProposal", |chain, caller| {
            chain.process_whitelist(caller, id)
        })
        .await
    }

    async fn process_guild_kick_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt> {
        self.execute(signer, "processGuildKickProposal", |chain, caller| {
            chain.process_guild_kick(caller, id)
        })
        .await
    }

    async fn cancel_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt> {
        self.execute(signer, "cancelProposal", |chain, caller| chain.cancel(caller, id))
            .await
    }

    async fn ragequit(&self, signer: &Signer, shares: Weight, loot: Weight) -> LedgerResult<Receipt> {
        self.execute(signer, "ragequit", |chain, caller| chain.ragequit(caller, shares, loot))
            .await
    }

    async fn ragekick(&self, signer: &Signer, member: &Address) -> LedgerResult<Receipt> {
        self.execute(signer, "ragekick", |chain, _caller| chain.ragekick(member))
            .await
    }

    async fn update_delegate_key(&self, signer: &Signer, new_delegate: &Address) -> LedgerResult<Receipt> {
        self.execute(signer, "updateDelegateKey", |chain, caller| {
            chain.update_delegate(caller, new_delegate)
        })
        .await
    }

    async fn withdraw_balance(&self, signer: &Signer, token: &Address, amount: Amount) -> LedgerResult<Receipt> {
        self.execute(signer, "withdrawBalance", |chain, caller| chain.withdraw(caller, token, amount))
            .await
    }

    async fn collect_tokens(&self, signer: &Signer, token: &Address) -> LedgerResult<Receipt> {
        self.execute(signer, "collectTokens", |chain, caller| chain.collect(caller, token))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    pub fn signer(n: u64) -> Signer {
        Signer::new(addr(n))
    }

    pub const DAO: u64 = 0xda0;
    pub const TOKEN: u64 = 0x70;
    pub const SUMMONER: u64 = 0xa1;

    /// Guild with deposit 10, reward 1, 5 voting and 2 grace periods
    pub fn params() -> SimulationParams {
        SimulationParams {
            summoner: addr(SUMMONER),
            deposit_token: addr(TOKEN),
            approved_tokens: vec![],
            proposal_deposit: Amount::new(10),
            processing_reward: Amount::new(1),
            voting_period_length: 5,
            grace_period_length: 2,
            summoner_shares: Weight::new(1).unwrap(),
            summoner_balance: Amount::ZERO,
            period_duration_secs: None,
        }
    }

    pub fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(addr(DAO), params()).unwrap()
    }

    pub fn submission(applicant: u64, shares: u128, tribute: u128) -> ProposalSubmission {
        ProposalSubmission {
            applicant: addr(applicant),
            shares_requested: Weight::new(shares).unwrap(),
            loot_requested: Weight::ZERO,
            tribute_offered: Amount::new(tribute),
            tribute_token: addr(TOKEN),
            payment_requested: Amount::ZERO,
            payment_token: addr(TOKEN),
            details: "membership".to_string(),
        }
    }

    /// Submit, sponsor, vote yes and process a membership proposal for `applicant`
    pub async fn admit(ledger: &InMemoryLedger, applicant: u64, shares: u128, tribute: u128) -> ProposalId {
        let summoner = signer(SUMMONER);
        let dao = addr(DAO);
        let token = addr(TOKEN);
        if tribute > 0 {
            ledger.mint(&token, &addr(applicant), Amount::new(tribute)).await;
            ledger
                .approve(&token, &signer(applicant), &dao, Amount::new(tribute))
                .await
                .unwrap();
        }
        ledger.mint(&token, &addr(SUMMONER), Amount::new(10)).await;
        ledger.approve(&token, &summoner, &dao, Amount::new(10)).await.unwrap();

        let receipt = ledger
            .submit_proposal(&summoner, &submission(applicant, shares, tribute))
            .await
            .unwrap();
        let id = match &receipt.events[0] {
            LedgerEvent::SubmitProposal { proposal_id, .. } => *proposal_id,
            other => panic!("unexpected event {:?}", other),
        };
        ledger.sponsor_proposal(&summoner, id).await.unwrap();
        ledger.advance_periods(1).await;
        ledger.submit_vote(&summoner, id, Vote::Yes).await.unwrap();
        ledger.advance_periods(7).await;
        ledger.process_proposal(&summoner, id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_summoner_is_only_member() {
        let ledger = ledger();
        let member = ledger.member(&addr(SUMMONER)).await.unwrap();
        assert!(member.exists);
        assert_eq!(member.shares, Weight::new(1).unwrap());
        assert_eq!(ledger.member(&addr(0xb0)).await.unwrap(), MemberRecord::absent());
    }

    #[tokio::test]
    async fn test_passed_proposal_grants_shares_and_banks_tribute() {
        let ledger = ledger();
        let id = admit(&ledger, 0xb0, 5, 100).await;

        let proposal = ledger.proposal(id).await.unwrap();
        assert!(proposal.flags.processed && proposal.flags.did_pass);

        let member = ledger.member(&addr(0xb0)).await.unwrap();
        assert_eq!(member.shares, Weight::new(5).unwrap());
        assert_eq!(
            ledger
                .user_token_balance(&Address::from_low_u64(GUILD), &addr(TOKEN))
                .await
                .unwrap(),
            Amount::new(100)
        );
        // deposit back to the sponsor minus the processing reward paid to the same caller
        assert_eq!(
            ledger.user_token_balance(&addr(SUMMONER), &addr(TOKEN)).await.unwrap(),
            Amount::new(10)
        );
    }

    #[tokio::test]
    async fn test_reverted_call_leaves_state_untouched() {
        let ledger = ledger();
        let before = ledger.block_number().await.unwrap();
        let err = ledger
            .sponsor_proposal(&signer(SUMMONER), 0)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Reverted("transfer amount exceeds allowance".into()));
        assert_eq!(ledger.block_number().await.unwrap(), before);

        let calls = ledger.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].reverted.is_some());
    }

    #[tokio::test]
    async fn test_process_before_grace_period_reverts() {
        let ledger = ledger();
        let summoner = signer(SUMMONER);
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        ledger.approve(&addr(TOKEN), &summoner, &addr(DAO), Amount::new(10)).await.unwrap();
        ledger.submit_proposal(&summoner, &submission(0xb0, 1, 0)).await.unwrap();
        ledger.sponsor_proposal(&summoner, 0).await.unwrap();

        let err = ledger.process_proposal(&summoner, 0).await.unwrap_err();
        assert_eq!(err, LedgerError::Reverted("proposal is not ready to be processed".into()));
    }

    #[tokio::test]
    async fn test_guild_kick_then_ragekick_returns_fair_share() {
        let ledger = ledger();
        admit(&ledger, 0xb0, 1, 100).await;

        let summoner = signer(SUMMONER);
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        ledger.approve(&addr(TOKEN), &summoner, &addr(DAO), Amount::new(10)).await.unwrap();
        let receipt = ledger
            .submit_guild_kick_proposal(&summoner, &addr(0xb0), "kick")
            .await
            .unwrap();
        let id = match &receipt.events[0] {
            LedgerEvent::SubmitProposal { proposal_id, .. } => *proposal_id,
            other => panic!("unexpected event {:?}", other),
        };
        ledger.sponsor_proposal(&summoner, id).await.unwrap();
        ledger.advance_periods(1).await;
        ledger.submit_vote(&summoner, id, Vote::Yes).await.unwrap();
        ledger.advance_periods(7).await;
        ledger.process_guild_kick_proposal(&summoner, id).await.unwrap();

        let jailed = ledger.member(&addr(0xb0)).await.unwrap();
        assert!(jailed.jailed);
        assert_eq!(jailed.shares, Weight::ZERO);
        assert_eq!(jailed.loot, Weight::new(1).unwrap());

        // anyone may ragekick a jailed member
        let receipt = ledger.ragekick(&signer(0xc0), &addr(0xb0)).await.unwrap();
        match &receipt.events[0] {
            LedgerEvent::Ragequit { returned, .. } => {
                assert_eq!(returned, &vec![TokenAmount { token: addr(TOKEN), amount: Amount::new(50) }]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            ledger.user_token_balance(&addr(0xb0), &addr(TOKEN)).await.unwrap(),
            Amount::new(50)
        );
    }

    #[tokio::test]
    async fn test_withdraw_moves_internal_balance_out() {
        let ledger = ledger();
        admit(&ledger, 0xb0, 1, 100).await;

        let summoner = signer(SUMMONER);
        let before = ledger.balance_of(&addr(TOKEN), &addr(SUMMONER)).await.unwrap();
        ledger.withdraw_balance(&summoner, &addr(TOKEN), Amount::new(4)).await.unwrap();
        let after = ledger.balance_of(&addr(TOKEN), &addr(SUMMONER)).await.unwrap();
        assert_eq!(after.value() - before.value(), 4);

        let err = ledger
            .withdraw_balance(&summoner, &addr(TOKEN), Amount::new(1_000))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Reverted("insufficient balance".into()));
    }

    #[tokio::test]
    async fn test_unknown_token_reads_fail() {
        let ledger = ledger();
        assert!(ledger.balance_of(&addr(0xbad), &addr(SUMMONER)).await.is_err());
    }

    #[test]
    fn test_fair_share_handles_large_balances() {
        assert_eq!(fair_share(100, 1, 2), 50);
        assert_eq!(fair_share(u128::MAX, 1, 1), u128::MAX);
        assert_eq!(fair_share(10, 0, 3), 0);
        assert_eq!(fair_share(10, 1, 0), 0);
    }
}
