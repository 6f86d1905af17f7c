use rand::{rngs::StdRng, Rng, SeedableRng};

use dividend_token::{
    dividends::DustPolicy, Address, Amount, DividendToken, OwnerCap, TokenConfig, TokenError,
    Wallet,
};

const ACCOUNTS: usize = 6;

struct Harness {
    token: DividendToken,
    cap: OwnerCap,
    wallets: Vec<Wallet>,
    distributions: usize,
}

impl Harness {
    fn new(policy: DustPolicy) -> Self {
        let config = TokenConfig {
            dust_policy: policy,
            ..TokenConfig::default()
        };
        let (token, cap) = DividendToken::new(config).unwrap();
        let wallets = (0..ACCOUNTS)
            .map(|i| Wallet::new(Address::derive(b"fuzz", &[i as u8])))
            .collect();
        Self {
            token,
            cap,
            wallets,
            distributions: 0,
        }
    }

    fn addr(&self, i: usize) -> Address {
        self.wallets[i].address()
    }

    fn pending(&self) -> Vec<Amount> {
        (0..ACCOUNTS)
            .map(|i| self.token.withdrawable_dividend_of(&self.addr(i)).unwrap())
            .collect()
    }

    /// One random operation; returns whether it changed balances only.
    fn step(&mut self, rng: &mut StdRng) -> bool {
        let a = rng.gen_range(0..ACCOUNTS);
        let b = rng.gen_range(0..ACCOUNTS);
        let (from, to) = (self.addr(a), self.addr(b));
        match rng.gen_range(0..6) {
            0 => {
                let value = rng.gen_range(1..5_000u128);
                self.token.receive(from, value).unwrap();
                true
            }
            1 => {
                let have = self.token.balance_of(&from);
                let amount = rng.gen_range(0..=have + 10);
                let result = self.token.transfer(from, to, amount);
                if amount > have {
                    assert!(matches!(result, Err(TokenError::InsufficientBalance { .. })));
                } else {
                    assert_eq!(result, Ok(true));
                }
                true
            }
            2 => {
                let have = self.token.balance_of(&from);
                if have > 0 {
                    let amount = rng.gen_range(1..=have);
                    self.token.burn(from, amount).unwrap();
                }
                true
            }
            3 => {
                let value = rng.gen_range(1..10_000u128);
                let result = self.token.deposit_dividends(from, value);
                if self.token.total_supply() == 0 {
                    assert_eq!(result, Err(TokenError::NoHolders(value)));
                } else {
                    result.unwrap();
                    self.distributions += 1;
                }
                false
            }
            4 => {
                let owed = self.token.withdrawable_dividend_of(&from).unwrap();
                let before = self.wallets[a].received();
                let paid = self.token.withdraw(&mut self.wallets[a]).unwrap();
                assert_eq!(paid, owed);
                assert_eq!(self.wallets[a].received(), before + owed);
                assert_eq!(self.token.withdrawable_dividend_of(&from).unwrap(), 0);
                assert_eq!(self.token.withdraw(&mut self.wallets[a]).unwrap(), 0);
                false
            }
            _ => {
                let reserve = self.token.native_reserve();
                let swept = self
                    .token
                    .withdraw_ether(&self.cap, &mut self.wallets[b])
                    .unwrap();
                assert_eq!(swept, reserve);
                false
            }
        }
    }

    fn check(&self) {
        self.token.verify_invariants().unwrap();
        let supply: Amount = (0..ACCOUNTS)
            .map(|i| self.token.balance_of(&self.addr(i)))
            .sum();
        assert_eq!(supply, self.token.total_supply());
        for i in 0..ACCOUNTS {
            let addr = self.addr(i);
            assert_eq!(
                self.token.holders().contains(&addr),
                self.token.balance_of(&addr) > 0
            );
        }
        assert!(self.token.total_dividends_withdrawn() <= self.token.total_dividends_distributed());
    }
}

fn run(policy: DustPolicy, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut harness = Harness::new(policy);
    for _ in 0..400 {
        let before = harness.pending();
        let balance_only = harness.step(&mut rng);
        if balance_only {
            assert_eq!(harness.pending(), before, "balance move changed entitlement");
        }
        harness.check();
    }
    let dust = harness.token.total_dividends_distributed()
        - harness.token.total_dividends_withdrawn()
        - harness.pending().iter().sum::<Amount>();
    assert!(
        dust as usize <= harness.distributions + ACCOUNTS,
        "dust {dust} after {} distributions",
        harness.distributions
    );
}

#[test]
fn random_sequences_preserve_invariants_discard() {
    for seed in 0..8 {
        run(DustPolicy::Discard, seed);
    }
}

#[test]
fn random_sequences_preserve_invariants_carry_forward() {
    for seed in 100..108 {
        run(DustPolicy::CarryForward, seed);
    }
}

#[test]
fn replaying_same_operations_gives_same_root() {
    let mut roots = Vec::new();
    for _ in 0..2 {
        let mut rng = StdRng::seed_from_u64(42);
        let mut harness = Harness::new(DustPolicy::Discard);
        for _ in 0..200 {
            harness.step(&mut rng);
        }
        roots.push(harness.token.state_root());
    }
    assert_eq!(roots[0], roots[1]);
}
